//! Clip concatenation.

use std::path::{Path, PathBuf};

use tracing::info;

use clipmerge_models::EncodingConfig;

use crate::command::{FfmpegCommand, FfmpegRunner, ToolOutcome};
use crate::error::{MediaError, MediaResult};
use crate::filters::{concat_filter, CONCAT_AUDIO_LABEL, CONCAT_VIDEO_LABEL};
use crate::preprocess::ensure_output;

/// Build a single-invocation concat command for `inputs` in order.
pub fn concat_command(inputs: &[PathBuf], output: &Path, encoding: &EncodingConfig) -> FfmpegCommand {
    FfmpegCommand::new(output)
        .inputs(inputs)
        .filter_complex(concat_filter(inputs.len()))
        .map(CONCAT_VIDEO_LABEL)
        .map(CONCAT_AUDIO_LABEL)
        .output_args(["-fps_mode", "vfr"])
        .encoding(encoding)
}

/// Join two or more codec-compatible clips, video and audio, into `output`.
pub async fn concatenate_clips(
    runner: &FfmpegRunner,
    inputs: &[PathBuf],
    output: impl AsRef<Path>,
    encoding: &EncodingConfig,
) -> MediaResult<ToolOutcome> {
    let output = output.as_ref();

    if inputs.len() < 2 {
        return Err(MediaError::invalid_input(format!(
            "concatenation needs at least 2 inputs, got {}",
            inputs.len()
        )));
    }

    if let Some(missing) = inputs.iter().find(|p| !p.exists()) {
        return Err(MediaError::FileNotFound(missing.clone()));
    }

    let cmd = concat_command(inputs, output, encoding);
    let outcome = runner.run(&cmd).await?;
    ensure_output(output).await?;

    info!(
        output = %output.display(),
        inputs = inputs.len(),
        elapsed_ms = outcome.elapsed.as_millis() as u64,
        "Concatenated clips"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concat_command_layout() {
        let inputs = vec![PathBuf::from("preprocessed_a.mp4"), PathBuf::from("x.mp4")];
        let args = concat_command(&inputs, Path::new("a_x.mp4"), &EncodingConfig::for_concat())
            .build_args();

        let fc = args.iter().position(|a| a == "-filter_complex").unwrap();
        assert_eq!(args[fc + 1], "[0:v][0:a][1:v][1:a]concat=n=2:v=1:a=1[v][a]");
        assert!(args.contains(&"superfast".to_string()));
        assert_eq!(args.iter().filter(|a| *a == "-map").count(), 2);
        assert_eq!(args.last().map(String::as_str), Some("a_x.mp4"));
    }

    #[tokio::test]
    async fn test_requires_two_inputs() {
        let err = concatenate_clips(
            &FfmpegRunner::new(),
            &[PathBuf::from("only.mp4")],
            "out.mp4",
            &EncodingConfig::for_concat(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, MediaError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_missing_input_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("x.mp4");
        tokio::fs::write(&present, b"data").await.unwrap();
        let missing = dir.path().join("preprocessed_a.mp4");

        let err = concatenate_clips(
            &FfmpegRunner::new(),
            &[missing.clone(), present],
            dir.path().join("a_x.mp4"),
            &EncodingConfig::for_concat(),
        )
        .await
        .unwrap_err();
        match err {
            MediaError::FileNotFound(p) => assert_eq!(p, missing),
            other => panic!("unexpected error: {other}"),
        }
    }
}
