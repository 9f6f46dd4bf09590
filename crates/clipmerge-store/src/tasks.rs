//! Task record repository.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use clipmerge_models::{OutputEntry, Task, TaskError, TaskId};

use crate::error::{StoreError, StoreResult};

/// Persistence for merge task records.
///
/// `complete` and `fail` only succeed while the stored task is still
/// processing; a second terminal write is rejected with
/// [`StoreError::InvalidTransition`].
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Insert a new task. Fails with [`StoreError::Conflict`] if the id is taken.
    async fn create(&self, task: &Task) -> StoreResult<()>;

    /// Load a task by id.
    async fn get(&self, task_id: &TaskId) -> StoreResult<Option<Task>>;

    /// Move a processing task to completed with its manifest.
    async fn complete(&self, task_id: &TaskId, outputs: Vec<OutputEntry>) -> StoreResult<Task>;

    /// Move a processing task to failed with a classified error.
    async fn fail(&self, task_id: &TaskId, error: TaskError) -> StoreResult<Task>;

    /// Check the backend is reachable.
    async fn ping(&self) -> StoreResult<()>;
}

/// In-process task repository.
#[derive(Debug, Default)]
pub struct MemoryTaskRepository {
    tasks: RwLock<HashMap<TaskId, Task>>,
}

impl MemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    async fn transition<F>(&self, task_id: &TaskId, apply: F) -> StoreResult<Task>
    where
        F: FnOnce(&mut Task) -> Result<(), clipmerge_models::TransitionError> + Send,
    {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| StoreError::not_found(format!("task {task_id}")))?;
        apply(task)?;
        Ok(task.clone())
    }
}

#[async_trait]
impl TaskRepository for MemoryTaskRepository {
    async fn create(&self, task: &Task) -> StoreResult<()> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.task_id) {
            return Err(StoreError::conflict(format!("task {}", task.task_id)));
        }
        tasks.insert(task.task_id.clone(), task.clone());
        Ok(())
    }

    async fn get(&self, task_id: &TaskId) -> StoreResult<Option<Task>> {
        Ok(self.tasks.read().await.get(task_id).cloned())
    }

    async fn complete(&self, task_id: &TaskId, outputs: Vec<OutputEntry>) -> StoreResult<Task> {
        self.transition(task_id, move |task| task.complete(outputs)).await
    }

    async fn fail(&self, task_id: &TaskId, error: TaskError) -> StoreResult<Task> {
        self.transition(task_id, move |task| task.fail(error)).await
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
