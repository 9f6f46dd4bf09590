//! Task orchestrator.
//!
//! Accepts merge tasks into a bounded queue, debits their credits up front
//! and runs them on a fixed pool of workers. Every accepted task ends in
//! `completed` or `failed`; a failure refunds the debit exactly once and
//! discards the task's scratch directory. A background sweep removes
//! scratch directories left behind past the retention period.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::OwnedPermit;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn, Instrument};

use clipmerge_models::{OutputEntry, Task, TaskError, TaskErrorKind, TaskId};
use clipmerge_store::{CreditLedger, DebitOutcome, StoreError, TaskRepository};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::TaskLogger;
use crate::pairing::{PairingEngine, PairingJob};
use crate::retry::{with_backoff, Backoff};
use crate::scratch::ScratchSpace;

const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// A merge request as accepted from a client.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    /// Caller-supplied id; a UUID is generated when absent
    pub task_id: Option<TaskId>,
    pub account_id: String,
    pub short_inputs: Vec<PathBuf>,
    pub large_inputs: Vec<PathBuf>,
}

struct QueuedTask {
    task: Task,
    cancel: watch::Receiver<bool>,
    enqueued_at: Instant,
}

struct Shared {
    config: WorkerConfig,
    tasks: Arc<dyn TaskRepository>,
    credits: Arc<dyn CreditLedger>,
    engine: PairingEngine,
    scratch: ScratchSpace,
    /// Cancellation handles of queued and running tasks
    active: Mutex<HashMap<TaskId, watch::Sender<bool>>>,
    shutdown: watch::Sender<bool>,
}

/// Bounded queue plus worker pool for merge tasks.
pub struct TaskOrchestrator {
    shared: Arc<Shared>,
    sender: Mutex<Option<mpsc::Sender<QueuedTask>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskOrchestrator {
    /// Create the orchestrator and start its workers.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        config: WorkerConfig,
        tasks: Arc<dyn TaskRepository>,
        credits: Arc<dyn CreditLedger>,
        engine: PairingEngine,
        scratch: ScratchSpace,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let (shutdown, _) = watch::channel(false);

        info!(
            "Starting task orchestrator with {} workers and queue capacity {}",
            config.max_concurrent_tasks, config.queue_capacity
        );

        let shared = Arc::new(Shared {
            config,
            tasks,
            credits,
            engine,
            scratch,
            active: Mutex::new(HashMap::new()),
            shutdown,
        });

        let mut workers: Vec<JoinHandle<()>> = (0..shared.config.max_concurrent_tasks.max(1))
            .map(|worker_id| {
                let shared = Arc::clone(&shared);
                let receiver = Arc::clone(&receiver);
                tokio::spawn(async move {
                    loop {
                        // Hold the lock only while waiting for the next task
                        let next = receiver.lock().await.recv().await;
                        match next {
                            Some(queued) => shared.execute(queued).await,
                            None => break,
                        }
                    }
                    debug!(worker_id, "Worker stopped");
                })
            })
            .collect();

        workers.push(tokio::spawn(run_sweeper(
            Arc::downgrade(&shared),
            shared.shutdown.subscribe(),
            shared.config.scratch_sweep_interval.max(MIN_SWEEP_INTERVAL),
        )));

        Self {
            shared,
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        }
    }

    /// Accept a task and return its id immediately.
    ///
    /// The queue slot is reserved before credits are touched, so a full
    /// queue never costs the caller anything. Dropping the returned future
    /// after the slot is reserved does not abandon the admission.
    pub async fn dispatch(&self, mut request: DispatchRequest) -> WorkerResult<TaskId> {
        let task_id = request.task_id.take().unwrap_or_default();
        if !task_id.is_path_safe() {
            return Err(WorkerError::invalid_request(format!("unsafe task id: {task_id}")));
        }

        let sender = self
            .sender
            .lock()
            .map_err(|_| WorkerError::internal("dispatch lock poisoned"))?
            .clone()
            .ok_or(WorkerError::ShuttingDown)?;

        let permit = match sender.try_reserve_owned() {
            Ok(permit) => permit,
            Err(TrySendError::Full(_)) => {
                crate::metrics::record_task_rejected("queue_full");
                return Err(WorkerError::QueueFull {
                    capacity: self.shared.config.queue_capacity,
                });
            }
            Err(TrySendError::Closed(_)) => return Err(WorkerError::ShuttingDown),
        };

        // Once credits may move, admission runs detached so a caller that
        // stops waiting cannot strand a debit or a processing record
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move { shared.admit(task_id, request, permit).await })
            .await
            .map_err(|e| WorkerError::internal(format!("task admission aborted: {e}")))?
    }

    /// Mark a task completed with its manifest.
    pub async fn finalize(&self, task_id: &TaskId, outputs: Vec<OutputEntry>) -> WorkerResult<Task> {
        self.shared.finalize(task_id, outputs).await
    }

    /// Mark a task failed and refund its credits.
    pub async fn fail(&self, task_id: &TaskId, error: TaskError) -> WorkerResult<Task> {
        self.shared.fail(task_id, error).await
    }

    /// Signal cancellation to a queued or running task.
    pub async fn cancel(&self, task_id: &TaskId) -> WorkerResult<()> {
        let signalled = self
            .shared
            .active
            .lock()
            .map_err(|_| WorkerError::internal("active task lock poisoned"))?
            .get(task_id)
            .map(|tx| tx.send(true).is_ok())
            .unwrap_or(false);

        if signalled {
            info!(task_id = %task_id, "Cancellation requested");
            return Ok(());
        }

        match self.shared.tasks.get(task_id).await? {
            Some(_) => Err(WorkerError::TaskNotRunning(task_id.to_string())),
            None => Err(WorkerError::task_not_found(task_id.as_str())),
        }
    }

    /// Number of tasks queued or running.
    pub fn active_tasks(&self) -> usize {
        self.shared.active.lock().map(|active| active.len()).unwrap_or(0)
    }

    /// Whether new work is still accepted.
    pub fn is_accepting(&self) -> bool {
        !*self.shared.shutdown.borrow()
    }

    /// Stop accepting work and wait for in-flight tasks.
    ///
    /// Queued tasks that have not started are failed as cancelled. Running
    /// tasks get `shutdown_timeout` to finish before they are cancelled.
    pub async fn shutdown(&self) {
        info!("Shutting down task orchestrator");
        self.shared.shutdown.send_replace(true);

        // Dropping the last sender lets the workers drain and exit
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }

        let workers = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(_) => Vec::new(),
        };

        let join_all = futures::future::join_all(workers);
        tokio::pin!(join_all);
        let timeout = self.shared.config.shutdown_timeout;

        if tokio::time::timeout(timeout, &mut join_all).await.is_err() {
            warn!("In-flight tasks did not finish within {:?}, cancelling", timeout);
            self.shared.cancel_all();
            let _ = join_all.await;
        }

        info!("Task orchestrator stopped");
    }
}

impl Shared {
    async fn admit(
        &self,
        task_id: TaskId,
        request: DispatchRequest,
        permit: OwnedPermit<QueuedTask>,
    ) -> WorkerResult<TaskId> {
        let units = Task::required_units(&request.short_inputs);
        match self.credits.try_debit(&request.account_id, units).await? {
            DebitOutcome::Debited { balance_after } => {
                debug!(
                    task_id = %task_id,
                    account_id = %request.account_id,
                    units,
                    balance_after,
                    "Debited merge credits"
                );
            }
            DebitOutcome::Insufficient { balance } => {
                crate::metrics::record_task_rejected("insufficient_credits");
                return Err(WorkerError::InsufficientCredits {
                    required: units,
                    balance,
                });
            }
        }

        let task = Task::new(
            task_id.clone(),
            request.account_id,
            request.short_inputs,
            request.large_inputs,
        )
        .with_credits_debited(units);

        if let Err(e) = self.tasks.create(&task).await {
            self.refund(&task).await;
            if matches!(e, StoreError::Conflict(_)) {
                crate::metrics::record_task_rejected("duplicate_id");
            }
            return Err(e.into());
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);
        if let Ok(mut active) = self.active.lock() {
            active.insert(task_id.clone(), cancel_tx);
        }

        permit.send(QueuedTask {
            task,
            cancel: cancel_rx,
            enqueued_at: Instant::now(),
        });

        crate::metrics::record_task_dispatched();
        crate::metrics::record_credits_debited(units);
        info!(task_id = %task_id, units, "Task dispatched");

        Ok(task_id)
    }

    async fn execute(&self, queued: QueuedTask) {
        let QueuedTask {
            task,
            cancel,
            enqueued_at,
        } = queued;
        let task_id = task.task_id.clone();
        let logger = TaskLogger::new(&task_id, "merge");
        let span = logger.create_span();

        async {
            debug!(waited = ?enqueued_at.elapsed(), "Task picked up");
            let started = Instant::now();

            let result = if *cancel.borrow() {
                Err(WorkerError::Cancelled)
            } else if *self.shutdown.borrow() {
                Err(WorkerError::ShuttingDown)
            } else {
                logger.log_start(&format!(
                    "{} short x {} large clips",
                    task.short_inputs.len(),
                    task.large_inputs.len()
                ));
                crate::metrics::adjust_running_tasks(1.0);
                let result = self.run(&task, cancel).await;
                crate::metrics::adjust_running_tasks(-1.0);
                result
            };

            // Out of reach for cancel() before the terminal status is visible
            if let Ok(mut active) = self.active.lock() {
                active.remove(&task_id);
            }

            self.settle(&task_id, result, started, &logger).await;
        }
        .instrument(span)
        .await;
    }

    async fn run(&self, task: &Task, cancel: watch::Receiver<bool>) -> WorkerResult<Vec<OutputEntry>> {
        let output_dir = self.scratch.prepare_outputs(&task.task_id).await?;
        let job = PairingJob {
            task_id: task.task_id.clone(),
            short_inputs: task.short_inputs.clone(),
            large_inputs: task.large_inputs.clone(),
            output_dir,
        };

        let timeout = self.config.task_timeout;
        match tokio::time::timeout(timeout, self.engine.run(&job, cancel)).await {
            Ok(report) => report?.into_manifest(),
            Err(_) => Err(WorkerError::Timeout(timeout.as_secs())),
        }
    }

    async fn settle(
        &self,
        task_id: &TaskId,
        result: WorkerResult<Vec<OutputEntry>>,
        started: Instant,
        logger: &TaskLogger,
    ) {
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok(outputs) => {
                let produced = outputs.len();
                match self.finalize(task_id, outputs).await {
                    Ok(_) => {
                        crate::metrics::record_task_completed(elapsed, produced);
                        logger.log_completion(&format!("{} clips in {:.1}s", produced, elapsed));
                    }
                    Err(e) => {
                        error!(task_id = %task_id, "Failed to persist completion: {}", e);
                        let error = TaskError::new(TaskErrorKind::TransientIo, e.to_string());
                        self.fail_and_record(task_id, error, elapsed, logger).await;
                    }
                }
            }
            Err(e) => {
                self.fail_and_record(task_id, e.to_task_error(), elapsed, logger)
                    .await;
            }
        }
    }

    async fn fail_and_record(&self, task_id: &TaskId, error: TaskError, elapsed: f64, logger: &TaskLogger) {
        logger.log_failure(&error);
        let kind = error.kind;
        match self.fail(task_id, error).await {
            Ok(_) => crate::metrics::record_task_failed(kind, elapsed),
            Err(e) => error!(task_id = %task_id, "Failed to persist failure: {}", e),
        }

        // A failed task has nothing left to download
        if let Err(e) = self.scratch.cleanup_task(task_id).await {
            warn!(task_id = %task_id, "Failed to remove scratch directory: {}", e);
        }
    }

    async fn finalize(&self, task_id: &TaskId, outputs: Vec<OutputEntry>) -> WorkerResult<Task> {
        let task = with_backoff("finalize task", &Backoff::default(), StoreError::is_retryable, || {
            self.tasks.complete(task_id, outputs.clone())
        })
        .await?;
        Ok(task)
    }

    async fn fail(&self, task_id: &TaskId, error: TaskError) -> WorkerResult<Task> {
        // A rejected transition means the task was already terminal, so the
        // refund below only ever runs for the call that actually failed it
        let task = with_backoff("fail task", &Backoff::default(), StoreError::is_retryable, || {
            self.tasks.fail(task_id, error.clone())
        })
        .await?;
        self.refund(&task).await;
        Ok(task)
    }

    async fn refund(&self, task: &Task) {
        let units = task.credits_debited;
        if units == 0 {
            return;
        }

        match with_backoff("refund credits", &Backoff::default(), StoreError::is_retryable, || {
            self.credits.credit(&task.account_id, units)
        })
        .await
        {
            Ok(balance) => {
                crate::metrics::record_credits_refunded(units);
                info!(
                    task_id = %task.task_id,
                    account_id = %task.account_id,
                    units,
                    balance,
                    "Refunded merge credits"
                );
            }
            Err(e) => error!(
                task_id = %task.task_id,
                account_id = %task.account_id,
                units,
                "Failed to refund merge credits: {}", e
            ),
        }
    }

    /// Remove scratch directories untouched for longer than the retention
    /// period, skipping queued and running tasks.
    async fn sweep_scratch(&self) {
        let retention = self.config.scratch_retention;
        let busy: HashSet<TaskId> = match self.active.lock() {
            Ok(active) => active.keys().cloned().collect(),
            Err(_) => return,
        };

        match self.scratch.sweep(retention, &busy).await {
            Ok(removed) if removed.is_empty() => {}
            Ok(removed) => {
                crate::metrics::record_scratch_swept(removed.len());
                info!(count = removed.len(), "Swept expired scratch directories");
            }
            Err(e) => warn!("Scratch sweep failed: {}", e),
        }
    }

    fn cancel_all(&self) {
        if let Ok(active) = self.active.lock() {
            for tx in active.values() {
                let _ = tx.send(true);
            }
        }
    }
}

/// Periodic scratch sweep. Exits on shutdown or once the orchestrator is gone.
async fn run_sweeper(shared: Weak<Shared>, mut shutdown: watch::Receiver<bool>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => match shared.upgrade() {
                Some(shared) => shared.sweep_scratch().await,
                None => break,
            },
            _ = shutdown.changed() => break,
        }
    }
    debug!("Scratch sweeper stopped");
}
