//! Merge task record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

use crate::TaskStatus;

/// Unique identifier for a merge task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Generate a new random task ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id is safe to use as a single path component.
    pub fn is_path_safe(&self) -> bool {
        !self.0.is_empty()
            && self.0.len() <= 128
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One generated clip in a completed task's manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputEntry {
    /// Location of the clip in scratch storage
    pub path: PathBuf,
    /// File name shown to clients and used inside the archive
    pub display_name: String,
}

impl OutputEntry {
    pub fn new(path: impl Into<PathBuf>, display_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            display_name: display_name.into(),
        }
    }
}

/// Classification of a background fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskErrorKind {
    /// Missing tool or invalid configuration; retrying will not help
    Configuration,
    /// Filesystem or store I/O that may succeed on retry
    TransientIo,
    /// The media tool rejected an input clip
    UnsupportedInput,
    /// A tool invocation or the whole run exceeded its deadline
    Timeout,
    /// The task was cancelled by a client or by shutdown
    Cancelled,
    /// Anything else
    Internal,
}

impl TaskErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskErrorKind::Configuration => "configuration",
            TaskErrorKind::TransientIo => "transient_io",
            TaskErrorKind::UnsupportedInput => "unsupported_input",
            TaskErrorKind::Timeout => "timeout",
            TaskErrorKind::Cancelled => "cancelled",
            TaskErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for TaskErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error stored on a failed task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: TaskErrorKind,
    pub message: String,
}

impl TaskError {
    pub fn new(kind: TaskErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Rejected status transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Task {task_id} is already {current}, cannot move to {requested}")]
pub struct TransitionError {
    pub task_id: TaskId,
    pub current: TaskStatus,
    pub requested: TaskStatus,
}

/// A merge request and its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    /// Credit account that paid for this task
    pub account_id: String,
    pub status: TaskStatus,
    pub short_inputs: Vec<PathBuf>,
    pub large_inputs: Vec<PathBuf>,
    /// Populated only when completed
    #[serde(default)]
    pub outputs: Vec<OutputEntry>,
    /// Populated only when failed
    #[serde(default)]
    pub error: Option<TaskError>,
    /// Credits taken at dispatch
    #[serde(default)]
    pub credits_debited: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a new task in the `processing` state.
    pub fn new(
        task_id: TaskId,
        account_id: impl Into<String>,
        short_inputs: Vec<PathBuf>,
        large_inputs: Vec<PathBuf>,
    ) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            account_id: account_id.into(),
            status: TaskStatus::Processing,
            short_inputs,
            large_inputs,
            outputs: Vec::new(),
            error: None,
            credits_debited: 0,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    /// Set the credits debited for this task.
    pub fn with_credits_debited(mut self, units: u64) -> Self {
        self.credits_debited = units;
        self
    }

    /// Credits a merge task costs: one per short clip.
    pub fn required_units(short_inputs: &[PathBuf]) -> u64 {
        short_inputs.len() as u64
    }

    /// Number of pairings a successful run produces.
    pub fn expected_outputs(&self) -> usize {
        self.short_inputs.len() * self.large_inputs.len()
    }

    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn ensure_processing(&self, requested: TaskStatus) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError {
                task_id: self.task_id.clone(),
                current: self.status,
                requested,
            });
        }
        Ok(())
    }

    /// Mark task as completed with its manifest.
    pub fn complete(&mut self, outputs: Vec<OutputEntry>) -> Result<(), TransitionError> {
        self.ensure_processing(TaskStatus::Completed)?;
        let now = Utc::now();
        self.status = TaskStatus::Completed;
        self.outputs = outputs;
        self.updated_at = now;
        self.finished_at = Some(now);
        Ok(())
    }

    /// Mark task as failed with a classified error.
    pub fn fail(&mut self, error: TaskError) -> Result<(), TransitionError> {
        self.ensure_processing(TaskStatus::Failed)?;
        let now = Utc::now();
        self.status = TaskStatus::Failed;
        self.outputs.clear();
        self.error = Some(error);
        self.updated_at = now;
        self.finished_at = Some(now);
        Ok(())
    }
}
