//! FFprobe resolution lookup.

use std::path::Path;

use clipmerge_models::Resolution;

use crate::command::FfmpegRunner;
use crate::error::{MediaError, MediaResult};

/// Arguments asking ffprobe for the first video stream's size as `WxH` lines.
pub fn probe_args(path: &Path) -> Vec<String> {
    vec![
        "-v".to_string(),
        "error".to_string(),
        "-select_streams".to_string(),
        "v:0".to_string(),
        "-show_entries".to_string(),
        "stream=width,height".to_string(),
        "-of".to_string(),
        "csv=p=0:s=x".to_string(),
        path.to_string_lossy().to_string(),
    ]
}

/// First valid `WIDTHxHEIGHT` line of ffprobe's output.
pub fn parse_resolution_output(stdout: &str) -> Option<Resolution> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && line.contains('x'))
        .find_map(Resolution::parse)
}

/// Probe the resolution of the primary video stream of `path`.
pub async fn probe_resolution(runner: &FfmpegRunner, path: impl AsRef<Path>) -> MediaResult<Resolution> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    let stdout = runner.run_ffprobe(&probe_args(path)).await?;

    parse_resolution_output(&stdout)
        .ok_or_else(|| MediaError::ResolutionUnavailable(path.to_path_buf()))
}
