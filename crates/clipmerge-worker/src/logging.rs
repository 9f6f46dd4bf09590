//! Structured task logging utilities.
//!
//! Provides consistent, structured logging for merge task processing with
//! tracing spans and contextual information.

use tracing::{error, info, warn, Span};

use clipmerge_models::{TaskError, TaskId};

/// Task logger for structured logging with consistent formatting.
#[derive(Debug, Clone)]
pub struct TaskLogger {
    task_id: String,
    operation: String,
}

impl TaskLogger {
    /// Create a new logger for a specific task and operation.
    ///
    /// # Arguments
    /// * `task_id` - The unique identifier for the task
    /// * `operation` - The stage being logged (e.g., "merge", "package")
    pub fn new(task_id: &TaskId, operation: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            operation: operation.to_string(),
        }
    }

    /// Log the start of a task operation.
    pub fn log_start(&self, message: &str) {
        info!(
            task_id = %self.task_id,
            operation = %self.operation,
            "Task started: {}", message
        );
    }

    /// Log entry into a pipeline stage with the number of units it will run.
    pub fn log_stage(&self, stage: &str, units: usize) {
        info!(
            task_id = %self.task_id,
            operation = %self.operation,
            stage,
            units,
            "Task stage: {}", stage
        );
    }

    /// Log a warning.
    pub fn log_warning(&self, message: &str) {
        warn!(
            task_id = %self.task_id,
            operation = %self.operation,
            "Task warning: {}", message
        );
    }

    /// Log a classified task failure.
    pub fn log_failure(&self, error: &TaskError) {
        error!(
            task_id = %self.task_id,
            operation = %self.operation,
            error_kind = %error.kind,
            "Task failed: {}", error.message
        );
    }

    /// Log the completion of a task operation.
    pub fn log_completion(&self, message: &str) {
        info!(
            task_id = %self.task_id,
            operation = %self.operation,
            "Task completed: {}", message
        );
    }

    /// Get the task ID.
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Get the operation type.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Create a tracing span for this task.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "task",
            task_id = %self.task_id,
            operation = %self.operation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_logger_creation() {
        let task_id = TaskId::new();
        let logger = TaskLogger::new(&task_id, "merge");

        assert_eq!(logger.task_id(), task_id.to_string());
        assert_eq!(logger.operation(), "merge");
    }
}
