//! Video encoding configuration.
//!
//! Every preprocessed short clip is encoded with the same codec pair so the
//! concatenation stage always sees compatible inputs.

use serde::{Deserialize, Serialize};

/// Default video codec (H.264)
pub const DEFAULT_VIDEO_CODEC: &str = "libx264";
/// Default audio codec
pub const DEFAULT_AUDIO_CODEC: &str = "aac";
/// Preset used when normalizing short clips
pub const PREPROCESS_PRESET: &str = "ultrafast";
/// Preset used when joining a short clip with a large clip
pub const CONCAT_PRESET: &str = "superfast";
/// Pixel format every normalized clip is converted to
pub const PIXEL_FORMAT: &str = "yuv420p";

/// Video encoding configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingConfig {
    /// Video codec (e.g., "libx264")
    #[serde(default = "default_video_codec")]
    pub codec: String,

    /// Encoding preset (e.g., "ultrafast", "superfast")
    #[serde(default = "default_preset")]
    pub preset: String,

    /// Audio codec
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,

    /// Additional FFmpeg output arguments
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_video_codec() -> String {
    DEFAULT_VIDEO_CODEC.to_string()
}
fn default_preset() -> String {
    PREPROCESS_PRESET.to_string()
}
fn default_audio_codec() -> String {
    DEFAULT_AUDIO_CODEC.to_string()
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            codec: DEFAULT_VIDEO_CODEC.to_string(),
            preset: PREPROCESS_PRESET.to_string(),
            audio_codec: DEFAULT_AUDIO_CODEC.to_string(),
            extra_args: Vec::new(),
        }
    }
}

impl EncodingConfig {
    /// Configuration for normalizing short clips.
    pub fn for_preprocess() -> Self {
        Self::default()
    }

    /// Configuration for concatenating a normalized short clip with a large clip.
    pub fn for_concat() -> Self {
        Self {
            preset: CONCAT_PRESET.to_string(),
            ..Default::default()
        }
    }

    /// Convert to FFmpeg output arguments.
    pub fn to_ffmpeg_args(&self) -> Vec<String> {
        let mut args = vec![
            "-c:v".to_string(),
            self.codec.clone(),
            "-preset".to_string(),
            self.preset.clone(),
            "-c:a".to_string(),
            self.audio_codec.clone(),
        ];
        args.extend(self.extra_args.iter().cloned());
        args
    }
}
