//! Worker error types.

use thiserror::Error;

use clipmerge_media::MediaError;
use clipmerge_models::{TaskError, TaskErrorKind};
use clipmerge_store::StoreError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Task queue is full ({capacity} waiting)")]
    QueueFull { capacity: usize },

    #[error("Insufficient merge credits: {required} required, {balance} available")]
    InsufficientCredits { required: u64, balance: i64 },

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Task already exists: {0}")]
    TaskExists(String),

    #[error("Task is not running: {0}")]
    TaskNotRunning(String),

    #[error("Task is still processing: {0}")]
    NotReady(String),

    #[error("Task failed: {0}")]
    TaskFailed(TaskError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Worker pool is shutting down")]
    ShuttingDown,

    #[error("Preprocessing {clip} failed: {source}")]
    PreprocessFailed {
        clip: String,
        #[source]
        source: MediaError,
    },

    #[error("Reference resolution unavailable: {0}")]
    ProbeFailed(#[source] MediaError),

    #[error("{failed} of {total} pairings failed, first: {first}")]
    PairingsFailed {
        failed: usize,
        total: usize,
        first: String,
        kind: TaskErrorKind,
    },

    #[error("Task timed out after {0} seconds")]
    Timeout(u64),

    #[error("Task cancelled")]
    Cancelled,

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WorkerError {
    pub fn task_not_found(id: impl Into<String>) -> Self {
        Self::TaskNotFound(id.into())
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Classify this error for the task record.
    pub fn kind(&self) -> TaskErrorKind {
        match self {
            WorkerError::PreprocessFailed { source, .. } | WorkerError::ProbeFailed(source) => {
                match source.kind() {
                    // A probe that ran but reported nothing usable is still an input problem
                    TaskErrorKind::Internal => TaskErrorKind::UnsupportedInput,
                    kind => kind,
                }
            }
            WorkerError::Media(e) => e.kind(),
            WorkerError::PairingsFailed { kind, .. } => *kind,
            WorkerError::TaskFailed(e) => e.kind,
            WorkerError::Timeout(_) => TaskErrorKind::Timeout,
            WorkerError::Cancelled | WorkerError::ShuttingDown => TaskErrorKind::Cancelled,
            WorkerError::Io(_) => TaskErrorKind::TransientIo,
            WorkerError::Store(e) if e.is_retryable() => TaskErrorKind::TransientIo,
            WorkerError::InvalidRequest(_) => TaskErrorKind::UnsupportedInput,
            WorkerError::QueueFull { .. }
            | WorkerError::InsufficientCredits { .. }
            | WorkerError::TaskNotFound(_)
            | WorkerError::TaskExists(_)
            | WorkerError::TaskNotRunning(_)
            | WorkerError::NotReady(_)
            | WorkerError::Archive(_)
            | WorkerError::Store(_)
            | WorkerError::Internal(_) => TaskErrorKind::Internal,
        }
    }

    /// Error stored on the failed task.
    pub fn to_task_error(&self) -> TaskError {
        TaskError::new(self.kind(), self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_failure_keeps_media_kind() {
        let err = WorkerError::PreprocessFailed {
            clip: "a.mp4".into(),
            source: MediaError::Timeout(60),
        };
        assert_eq!(err.kind(), TaskErrorKind::Timeout);

        let err = WorkerError::PreprocessFailed {
            clip: "a.mp4".into(),
            source: MediaError::ffmpeg_failed("exit 1", None, Some(1)),
        };
        assert_eq!(err.kind(), TaskErrorKind::UnsupportedInput);
    }

    #[test]
    fn test_missing_tool_is_configuration() {
        assert_eq!(
            WorkerError::Media(MediaError::FfmpegNotFound).kind(),
            TaskErrorKind::Configuration
        );
    }

    #[test]
    fn test_task_error_message() {
        let err = WorkerError::PairingsFailed {
            failed: 1,
            total: 2,
            first: "a_x.mp4: File not found".into(),
            kind: TaskErrorKind::UnsupportedInput,
        };
        let task_error = err.to_task_error();
        assert_eq!(task_error.kind, TaskErrorKind::UnsupportedInput);
        assert!(task_error.message.starts_with("1 of 2 pairings failed"));
    }
}
