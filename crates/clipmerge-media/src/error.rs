//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

use clipmerge_models::TaskErrorKind;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur during media processing.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("No usable resolution reported for {0}")]
    ResolutionUnavailable(PathBuf),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Create an FFprobe failure error.
    pub fn ffprobe_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfprobeFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Classify this error for the task record.
    pub fn kind(&self) -> TaskErrorKind {
        match self {
            MediaError::FfmpegNotFound | MediaError::FfprobeNotFound => TaskErrorKind::Configuration,
            MediaError::FfmpegFailed { .. }
            | MediaError::FfprobeFailed { .. }
            | MediaError::ResolutionUnavailable(_)
            | MediaError::FileNotFound(_)
            | MediaError::InvalidInput(_) => TaskErrorKind::UnsupportedInput,
            MediaError::Cancelled => TaskErrorKind::Cancelled,
            MediaError::Timeout(_) => TaskErrorKind::Timeout,
            MediaError::Io(_) => TaskErrorKind::TransientIo,
            MediaError::Internal(_) => TaskErrorKind::Internal,
        }
    }

    /// Captured diagnostic output from the failing tool, if any.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            MediaError::FfmpegFailed { stderr, .. } | MediaError::FfprobeFailed { stderr, .. } => {
                stderr.as_deref()
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(MediaError::FfmpegNotFound.kind(), TaskErrorKind::Configuration);
        assert_eq!(
            MediaError::ffmpeg_failed("exit 1", Some("Invalid data".into()), Some(1)).kind(),
            TaskErrorKind::UnsupportedInput
        );
        assert_eq!(MediaError::Timeout(30).kind(), TaskErrorKind::Timeout);
        assert_eq!(MediaError::Cancelled.kind(), TaskErrorKind::Cancelled);
        assert_eq!(
            MediaError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk")).kind(),
            TaskErrorKind::TransientIo
        );
    }

    #[test]
    fn test_stderr_accessor() {
        let err = MediaError::ffprobe_failed("bad", Some("moov atom not found".into()), Some(1));
        assert_eq!(err.stderr(), Some("moov atom not found"));
        assert_eq!(MediaError::Cancelled.stderr(), None);
    }
}
