//! The media capabilities the pairing engine depends on.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::info;

use clipmerge_models::{EncodingConfig, Resolution};

use crate::command::{check_ffmpeg, check_ffprobe, FfmpegRunner, ToolOutcome};
use crate::concat::concatenate_clips;
use crate::error::MediaResult;
use crate::preprocess::preprocess_clip;
use crate::probe::probe_resolution;

/// Probe, normalize and join clips.
///
/// Every call receives the task's cancellation channel; implementations
/// must stop work and return [`crate::MediaError::Cancelled`] once it flips.
#[async_trait]
pub trait MediaToolchain: Send + Sync {
    /// Resolution of the first video stream of `path`.
    async fn probe_resolution(&self, path: &Path, cancel: watch::Receiver<bool>) -> MediaResult<Resolution>;

    /// Normalize one short clip into `output`.
    async fn preprocess(
        &self,
        input: &Path,
        output: &Path,
        reference: Option<Resolution>,
        cancel: watch::Receiver<bool>,
    ) -> MediaResult<ToolOutcome>;

    /// Join `inputs` in order into `output`.
    async fn concatenate(
        &self,
        inputs: &[PathBuf],
        output: &Path,
        cancel: watch::Receiver<bool>,
    ) -> MediaResult<ToolOutcome>;
}

/// [`MediaToolchain`] backed by the ffmpeg and ffprobe binaries.
#[derive(Debug, Clone)]
pub struct FfmpegToolchain {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    /// Per-invocation timeout in seconds
    timeout_secs: Option<u64>,
    preprocess_encoding: EncodingConfig,
    concat_encoding: EncodingConfig,
}

impl FfmpegToolchain {
    /// Locate both binaries on PATH.
    pub fn detect() -> MediaResult<Self> {
        let ffmpeg = check_ffmpeg()?;
        let ffprobe = check_ffprobe()?;
        info!(
            ffmpeg = %ffmpeg.display(),
            ffprobe = %ffprobe.display(),
            "Media toolchain detected"
        );
        Ok(Self::with_binaries(ffmpeg, ffprobe))
    }

    /// Use explicit binary locations.
    pub fn with_binaries(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            timeout_secs: None,
            preprocess_encoding: EncodingConfig::for_preprocess(),
            concat_encoding: EncodingConfig::for_concat(),
        }
    }

    /// Bound every invocation to `secs` seconds.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    fn runner(&self, cancel: watch::Receiver<bool>) -> FfmpegRunner {
        let runner = FfmpegRunner::new()
            .with_binaries(&self.ffmpeg, &self.ffprobe)
            .with_cancel(cancel);
        match self.timeout_secs {
            Some(secs) => runner.with_timeout(secs),
            None => runner,
        }
    }
}

#[async_trait]
impl MediaToolchain for FfmpegToolchain {
    async fn probe_resolution(&self, path: &Path, cancel: watch::Receiver<bool>) -> MediaResult<Resolution> {
        probe_resolution(&self.runner(cancel), path).await
    }

    async fn preprocess(
        &self,
        input: &Path,
        output: &Path,
        reference: Option<Resolution>,
        cancel: watch::Receiver<bool>,
    ) -> MediaResult<ToolOutcome> {
        preprocess_clip(&self.runner(cancel), input, output, reference, &self.preprocess_encoding).await
    }

    async fn concatenate(
        &self,
        inputs: &[PathBuf],
        output: &Path,
        cancel: watch::Receiver<bool>,
    ) -> MediaResult<ToolOutcome> {
        concatenate_clips(&self.runner(cancel), inputs, output, &self.concat_encoding).await
    }
}
