//! Task status lookups for polling clients.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use clipmerge_models::{OutputEntry, Task, TaskError, TaskId, TaskStatus};
use clipmerge_store::TaskRepository;

use crate::error::{WorkerError, WorkerResult};

/// What a client sees when polling a task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskStatusView {
    pub task_id: TaskId,
    pub status: TaskStatus,
    /// Present only once completed
    pub outputs: Option<Vec<OutputEntry>>,
    /// Present only once failed
    pub error: Option<TaskError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Task> for TaskStatusView {
    fn from(task: Task) -> Self {
        let outputs = (task.status == TaskStatus::Completed).then_some(task.outputs);
        let error = if task.status == TaskStatus::Failed {
            task.error
        } else {
            None
        };

        Self {
            task_id: task.task_id,
            status: task.status,
            outputs,
            error,
            created_at: task.created_at,
            updated_at: task.updated_at,
        }
    }
}

/// Read-only view over the task repository.
#[derive(Clone)]
pub struct StatusReporter {
    tasks: Arc<dyn TaskRepository>,
}

impl StatusReporter {
    pub fn new(tasks: Arc<dyn TaskRepository>) -> Self {
        Self { tasks }
    }

    pub async fn get_status(&self, task_id: &TaskId) -> WorkerResult<TaskStatusView> {
        self.tasks
            .get(task_id)
            .await?
            .map(TaskStatusView::from)
            .ok_or_else(|| WorkerError::task_not_found(task_id.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipmerge_models::TaskErrorKind;
    use clipmerge_store::MemoryTaskRepository;
    use std::path::PathBuf;

    fn task(id: &str) -> Task {
        Task::new(
            TaskId::from_string(id),
            "acct",
            vec![PathBuf::from("a.mp4")],
            vec![PathBuf::from("x.mp4")],
        )
    }

    #[tokio::test]
    async fn test_processing_has_no_outputs() {
        let repo = Arc::new(MemoryTaskRepository::new());
        repo.create(&task("t1")).await.unwrap();

        let view = StatusReporter::new(repo).get_status(&TaskId::from_string("t1")).await.unwrap();
        assert_eq!(view.status, TaskStatus::Processing);
        assert!(view.outputs.is_none());
        assert!(view.error.is_none());
    }

    #[tokio::test]
    async fn test_completed_and_failed_views() {
        let repo = Arc::new(MemoryTaskRepository::new());
        repo.create(&task("done")).await.unwrap();
        repo.create(&task("broken")).await.unwrap();
        repo.complete(
            &TaskId::from_string("done"),
            vec![OutputEntry::new("/s/done/outputs/a_x.mp4", "a_x.mp4")],
        )
        .await
        .unwrap();
        repo.fail(
            &TaskId::from_string("broken"),
            TaskError::new(TaskErrorKind::UnsupportedInput, "bad clip"),
        )
        .await
        .unwrap();

        let reporter = StatusReporter::new(repo);

        let done = reporter.get_status(&TaskId::from_string("done")).await.unwrap();
        assert_eq!(done.outputs.map(|o| o.len()), Some(1));

        let broken = reporter.get_status(&TaskId::from_string("broken")).await.unwrap();
        assert_eq!(broken.status, TaskStatus::Failed);
        assert!(broken.outputs.is_none());
        assert_eq!(broken.error.map(|e| e.kind), Some(TaskErrorKind::UnsupportedInput));
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let reporter = StatusReporter::new(Arc::new(MemoryTaskRepository::new()));
        let err = reporter.get_status(&TaskId::from_string("nope")).await.unwrap_err();
        assert!(matches!(err, WorkerError::TaskNotFound(_)));
    }
}
