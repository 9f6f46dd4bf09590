//! Short clip normalization.

use std::path::Path;

use tracing::{debug, info};

use clipmerge_models::{EncodingConfig, Resolution};

use crate::command::{FfmpegCommand, FfmpegRunner, ToolOutcome};
use crate::error::{MediaError, MediaResult};
use crate::filters::scale_pad_filter;

/// Build the normalization command for one clip.
pub fn preprocess_command(
    input: &Path,
    output: &Path,
    reference: Option<Resolution>,
    encoding: &EncodingConfig,
) -> FfmpegCommand {
    let mut cmd = FfmpegCommand::new(output).input(input);
    if let Some(target) = reference {
        cmd = cmd.video_filter(scale_pad_filter(target));
    }
    cmd.encoding(encoding)
}

/// Re-encode `input` into `output`, fitted and padded to `reference` when given.
///
/// Without a reference the clip is only re-encoded with the canonical codecs.
pub async fn preprocess_clip(
    runner: &FfmpegRunner,
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    reference: Option<Resolution>,
    encoding: &EncodingConfig,
) -> MediaResult<ToolOutcome> {
    let input = input.as_ref();
    let output = output.as_ref();

    if !input.exists() {
        return Err(MediaError::FileNotFound(input.to_path_buf()));
    }

    match reference {
        Some(r) => debug!("Preprocessing {} to {}", input.display(), r),
        None => debug!("Preprocessing {} without scaling", input.display()),
    }

    let cmd = preprocess_command(input, output, reference, encoding);
    let outcome = runner.run(&cmd).await?;
    ensure_output(output).await?;

    info!(
        input = %input.display(),
        output = %output.display(),
        elapsed_ms = outcome.elapsed.as_millis() as u64,
        "Preprocessed clip"
    );
    Ok(outcome)
}

/// A successful exit must leave a non-empty output file behind.
pub(crate) async fn ensure_output(output: &Path) -> MediaResult<()> {
    match tokio::fs::metadata(output).await {
        Ok(meta) if meta.len() > 0 => Ok(()),
        Ok(_) => Err(MediaError::ffmpeg_failed(
            format!("FFmpeg produced an empty file: {}", output.display()),
            None,
            Some(0),
        )),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(MediaError::ffmpeg_failed(
            format!("FFmpeg did not produce {}", output.display()),
            None,
            Some(0),
        )),
        Err(e) => Err(MediaError::Io(e)),
    }
}
