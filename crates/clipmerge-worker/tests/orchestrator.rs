//! Task orchestrator: dispatch, credits, backpressure and packaging.

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use clipmerge_models::{OutputEntry, Task, TaskError, TaskErrorKind, TaskId, TaskStatus};
use clipmerge_store::{
    CreditLedger, MemoryCreditLedger, MemoryTaskRepository, StoreError, StoreResult, TaskRepository,
};
use clipmerge_worker::{
    DispatchRequest, InputRole, PairingEngine, ResultPackager, ScratchSpace, StatusReporter, TaskOrchestrator,
    TaskStatusView, WorkerConfig, WorkerError,
};

use common::FakeToolchain;

const ACCOUNT: &str = "acct-1";

struct Harness {
    orchestrator: TaskOrchestrator,
    reporter: StatusReporter,
    packager: ResultPackager,
    credits: Arc<MemoryCreditLedger>,
    toolchain: Arc<FakeToolchain>,
    scratch: ScratchSpace,
    _root: tempfile::TempDir,
}

fn harness(toolchain: FakeToolchain, balance: i64, max_tasks: usize, queue_capacity: usize) -> Harness {
    let config = WorkerConfig {
        max_concurrent_tasks: max_tasks,
        queue_capacity,
        ..base_config()
    };
    harness_with(toolchain, balance, config, Arc::new(MemoryTaskRepository::new()))
}

fn base_config() -> WorkerConfig {
    WorkerConfig {
        preprocess_parallelism: 2,
        concat_parallelism: 2,
        shutdown_timeout: Duration::from_secs(2),
        ..WorkerConfig::default()
    }
}

fn harness_with(
    toolchain: FakeToolchain,
    balance: i64,
    mut config: WorkerConfig,
    tasks: Arc<dyn TaskRepository>,
) -> Harness {
    let root = tempfile::tempdir().unwrap();
    config.scratch_dir = root.path().display().to_string();

    let toolchain = Arc::new(toolchain);
    let credits = Arc::new(MemoryCreditLedger::with_balances([(ACCOUNT, balance)]));
    let scratch = ScratchSpace::new(root.path());
    let engine = PairingEngine::new(toolchain.clone(), &config);

    let orchestrator = TaskOrchestrator::start(config, tasks.clone(), credits.clone(), engine, scratch.clone());

    Harness {
        orchestrator,
        reporter: StatusReporter::new(tasks.clone()),
        packager: ResultPackager::new(tasks, scratch.clone(), true),
        credits,
        toolchain,
        scratch,
        _root: root,
    }
}

/// Repository whose `create` stalls after the record is written.
struct SlowCreateRepository {
    inner: MemoryTaskRepository,
    delay: Duration,
}

#[async_trait]
impl TaskRepository for SlowCreateRepository {
    async fn create(&self, task: &Task) -> StoreResult<()> {
        self.inner.create(task).await?;
        tokio::time::sleep(self.delay).await;
        Ok(())
    }

    async fn get(&self, task_id: &TaskId) -> StoreResult<Option<Task>> {
        self.inner.get(task_id).await
    }

    async fn complete(&self, task_id: &TaskId, outputs: Vec<OutputEntry>) -> StoreResult<Task> {
        self.inner.complete(task_id, outputs).await
    }

    async fn fail(&self, task_id: &TaskId, error: TaskError) -> StoreResult<Task> {
        self.inner.fail(task_id, error).await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.inner.ping().await
    }
}

async fn wait_removed(path: &Path) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while path.exists() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("scratch directory was not removed");
}

impl Harness {
    async fn request(&self, task_id: &str, shorts: &[&str], larges: &[&str]) -> DispatchRequest {
        let id = TaskId::from_string(task_id);
        let mut short_inputs = Vec::new();
        for name in shorts {
            short_inputs.push(self.scratch.save_upload(&id, InputRole::Short, name, b"s").await.unwrap());
        }
        let mut large_inputs = Vec::new();
        for name in larges {
            large_inputs.push(self.scratch.save_upload(&id, InputRole::Large, name, b"l").await.unwrap());
        }
        DispatchRequest {
            task_id: Some(id),
            account_id: ACCOUNT.to_string(),
            short_inputs,
            large_inputs,
        }
    }

    async fn wait_terminal(&self, task_id: &TaskId) -> TaskStatusView {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let view = self.reporter.get_status(task_id).await.unwrap();
                if view.status.is_terminal() {
                    return view;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("task did not finish")
    }

    async fn wait_started(&self, probes: usize) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while self.toolchain.probe_count() < probes {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("task did not start");
    }

    async fn balance(&self) -> i64 {
        self.credits.balance(ACCOUNT).await.unwrap()
    }
}

#[tokio::test]
async fn test_dispatch_completes_and_debits_per_short_clip() {
    let h = harness(FakeToolchain::new(), 5, 2, 4);
    let request = h.request("merge-1", &["a.mp4", "b.mp4"], &["x.mp4"]).await;

    let task_id = h.orchestrator.dispatch(request).await.unwrap();
    let view = h.wait_terminal(&task_id).await;

    assert_eq!(view.status, TaskStatus::Completed);
    let names: Vec<_> = view
        .outputs
        .unwrap()
        .into_iter()
        .map(|o| o.display_name)
        .collect();
    assert_eq!(names, vec!["a_x.mp4", "b_x.mp4"]);
    assert_eq!(h.balance().await, 3);
}

#[tokio::test]
async fn test_generated_task_id() {
    let h = harness(FakeToolchain::new(), 5, 1, 4);
    let mut request = h.request("ignored", &["a.mp4"], &["x.mp4"]).await;
    request.task_id = None;

    let task_id = h.orchestrator.dispatch(request).await.unwrap();
    assert!(task_id.is_path_safe());
    assert_eq!(task_id.as_str().len(), 36);
}

#[tokio::test]
async fn test_empty_short_inputs_complete_for_free() {
    let h = harness(FakeToolchain::new(), 0, 1, 4);
    let request = h.request("empty", &[], &["x.mp4"]).await;

    let task_id = h.orchestrator.dispatch(request).await.unwrap();
    let view = h.wait_terminal(&task_id).await;

    assert_eq!(view.status, TaskStatus::Completed);
    assert_eq!(view.outputs, Some(Vec::new()));
    assert!(h.toolchain.calls().is_empty());
    assert_eq!(h.balance().await, 0);
}

#[tokio::test]
async fn test_insufficient_credits_rejects_without_task() {
    let h = harness(FakeToolchain::new(), 1, 1, 4);
    let request = h.request("poor", &["a.mp4", "b.mp4"], &["x.mp4"]).await;

    let err = h.orchestrator.dispatch(request).await.unwrap_err();

    assert!(matches!(err, WorkerError::InsufficientCredits { required: 2, balance: 1 }));
    assert!(matches!(
        h.reporter.get_status(&TaskId::from_string("poor")).await,
        Err(WorkerError::TaskNotFound(_))
    ));
    assert_eq!(h.balance().await, 1);
}

#[tokio::test]
async fn test_failed_task_is_classified_and_refunded() {
    let h = harness(FakeToolchain::new().failing_preprocess("a"), 5, 1, 4);
    let request = h.request("broken", &["a.mp4", "b.mp4"], &["x.mp4"]).await;

    let task_id = h.orchestrator.dispatch(request).await.unwrap();
    let view = h.wait_terminal(&task_id).await;

    assert_eq!(view.status, TaskStatus::Failed);
    assert!(view.outputs.is_none());
    assert_eq!(view.error.map(|e| e.kind), Some(TaskErrorKind::UnsupportedInput));
    assert_eq!(h.balance().await, 5);

    // Uploads of a failed task are discarded
    wait_removed(&h.scratch.task_dir(&task_id).unwrap()).await;
}

#[tokio::test]
async fn test_partial_pairing_failure_fails_task() {
    let h = harness(FakeToolchain::new().vanishing_preprocess("a"), 5, 1, 4);
    let request = h.request("partial", &["a.mp4", "b.mp4"], &["x.mp4"]).await;

    let task_id = h.orchestrator.dispatch(request).await.unwrap();
    let view = h.wait_terminal(&task_id).await;

    assert_eq!(view.status, TaskStatus::Failed);
    let error = view.error.unwrap();
    assert!(error.message.contains("1 of 2 pairings failed"));
    assert_eq!(h.balance().await, 5);
}

#[tokio::test]
async fn test_full_queue_rejects_before_debit() {
    let h = harness(FakeToolchain::new().with_delay(Duration::from_secs(30)), 10, 1, 1);

    let running = h.request("running", &["a.mp4"], &["x.mp4"]).await;
    let running = h.orchestrator.dispatch(running).await.unwrap();
    h.wait_started(1).await;

    let queued = h.request("queued", &["a.mp4"], &["x.mp4"]).await;
    let queued = h.orchestrator.dispatch(queued).await.unwrap();

    let rejected = h.request("rejected", &["a.mp4", "b.mp4"], &["x.mp4"]).await;
    let err = h.orchestrator.dispatch(rejected).await.unwrap_err();

    assert!(matches!(err, WorkerError::QueueFull { capacity: 1 }));
    assert_eq!(h.balance().await, 8);
    assert!(matches!(
        h.reporter.get_status(&TaskId::from_string("rejected")).await,
        Err(WorkerError::TaskNotFound(_))
    ));

    h.orchestrator.cancel(&running).await.unwrap();
    h.orchestrator.cancel(&queued).await.unwrap();
    assert_eq!(h.wait_terminal(&running).await.status, TaskStatus::Failed);
    assert_eq!(h.wait_terminal(&queued).await.status, TaskStatus::Failed);
    assert_eq!(h.balance().await, 10);
}

#[tokio::test]
async fn test_duplicate_task_id_is_refunded() {
    let h = harness(FakeToolchain::new().with_delay(Duration::from_secs(30)), 10, 1, 4);

    let first = h.request("dup", &["a.mp4"], &["x.mp4"]).await;
    let task_id = h.orchestrator.dispatch(first).await.unwrap();

    let second = h.request("dup", &["a.mp4", "b.mp4"], &["x.mp4"]).await;
    let err = h.orchestrator.dispatch(second).await.unwrap_err();

    assert!(matches!(err, WorkerError::Store(StoreError::Conflict(_))));
    assert_eq!(h.balance().await, 9);

    h.orchestrator.cancel(&task_id).await.unwrap();
    h.wait_terminal(&task_id).await;
}

#[tokio::test]
async fn test_cancel_running_task() {
    let h = harness(FakeToolchain::new().with_delay(Duration::from_secs(30)), 5, 1, 4);
    let request = h.request("slow", &["a.mp4", "b.mp4"], &["x.mp4"]).await;

    let task_id = h.orchestrator.dispatch(request).await.unwrap();
    h.wait_started(1).await;
    h.orchestrator.cancel(&task_id).await.unwrap();

    let view = h.wait_terminal(&task_id).await;
    assert_eq!(view.status, TaskStatus::Failed);
    assert_eq!(view.error.map(|e| e.kind), Some(TaskErrorKind::Cancelled));
    assert_eq!(h.balance().await, 5);

    // Finished and unknown tasks cannot be cancelled
    assert!(matches!(
        h.orchestrator.cancel(&task_id).await,
        Err(WorkerError::TaskNotRunning(_))
    ));
    assert!(matches!(
        h.orchestrator.cancel(&TaskId::from_string("nope")).await,
        Err(WorkerError::TaskNotFound(_))
    ));
}

#[tokio::test]
async fn test_refund_happens_once() {
    let h = harness(FakeToolchain::new().with_delay(Duration::from_millis(200)), 5, 1, 4);
    let request = h.request("once", &["a.mp4", "b.mp4"], &["x.mp4"]).await;

    let task_id = h.orchestrator.dispatch(request).await.unwrap();
    h.wait_started(1).await;

    let failed = h
        .orchestrator
        .fail(
            &task_id,
            clipmerge_models::TaskError::new(TaskErrorKind::Internal, "operator abort"),
        )
        .await
        .unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(h.balance().await, 5);

    // The run itself finishes later and must neither complete nor refund again
    tokio::time::sleep(Duration::from_millis(800)).await;
    let view = h.wait_terminal(&task_id).await;
    assert_eq!(view.status, TaskStatus::Failed);
    assert_eq!(view.error.map(|e| e.message), Some("operator abort".to_string()));
    assert_eq!(h.balance().await, 5);

    assert!(matches!(
        h.orchestrator.fail(&task_id, clipmerge_models::TaskError::new(TaskErrorKind::Internal, "again")).await,
        Err(WorkerError::Store(StoreError::InvalidTransition(_)))
    ));
    assert_eq!(h.balance().await, 5);
}

#[tokio::test]
async fn test_unsafe_task_id_rejected() {
    let h = harness(FakeToolchain::new(), 5, 1, 4);
    let request = DispatchRequest {
        task_id: Some(TaskId::from_string("../escape")),
        account_id: ACCOUNT.to_string(),
        short_inputs: Vec::new(),
        large_inputs: Vec::new(),
    };

    let err = h.orchestrator.dispatch(request).await.unwrap_err();
    assert!(matches!(err, WorkerError::InvalidRequest(_)));
}

#[tokio::test]
async fn test_dispatch_after_shutdown() {
    let h = harness(FakeToolchain::new(), 5, 1, 4);
    h.orchestrator.shutdown().await;
    assert!(!h.orchestrator.is_accepting());

    let request = h.request("late", &["a.mp4"], &["x.mp4"]).await;
    let err = h.orchestrator.dispatch(request).await.unwrap_err();
    assert!(matches!(err, WorkerError::ShuttingDown));
    assert_eq!(h.balance().await, 5);
}

#[tokio::test]
async fn test_package_completed_task_and_clean_only_its_scratch() {
    let h = harness(FakeToolchain::new(), 10, 2, 4);

    let first = h.request("first", &["a.mp4", "b.mp4"], &["x.mp4"]).await;
    let second = h.request("second", &["c.mp4"], &["y.mp4"]).await;
    let first = h.orchestrator.dispatch(first).await.unwrap();
    let second = h.orchestrator.dispatch(second).await.unwrap();
    h.wait_terminal(&first).await;
    h.wait_terminal(&second).await;

    let archive = h.packager.package(&first).await.unwrap();
    assert_eq!(archive.file_name, "final_videos.zip");
    assert_eq!(archive.entries, vec!["a_x.mp4", "b_x.mp4"]);
    assert!(archive.skipped.is_empty());

    assert!(!h.scratch.task_dir(&first).unwrap().exists());
    assert!(h.scratch.task_dir(&second).unwrap().join("outputs/c_y.mp4").exists());

    // Packaging again after cleanup yields an archive with every file skipped
    let again = h.packager.package(&first).await.unwrap();
    assert!(again.entries.is_empty());
    assert_eq!(again.skipped.len(), 2);
}

#[tokio::test]
async fn test_package_requires_completion() {
    let h = harness(FakeToolchain::new().with_delay(Duration::from_secs(30)), 10, 1, 4);
    let request = h.request("pending", &["a.mp4"], &["x.mp4"]).await;
    let task_id = h.orchestrator.dispatch(request).await.unwrap();

    assert!(matches!(h.packager.package(&task_id).await, Err(WorkerError::NotReady(_))));

    h.orchestrator.cancel(&task_id).await.unwrap();
    h.wait_terminal(&task_id).await;
    assert!(matches!(h.packager.package(&task_id).await, Err(WorkerError::TaskFailed(_))));
    assert!(matches!(
        h.packager.package(&TaskId::from_string("missing")).await,
        Err(WorkerError::TaskNotFound(_))
    ));
}

#[tokio::test]
async fn test_abandoned_dispatch_still_queues_task() {
    let tasks = Arc::new(SlowCreateRepository {
        inner: MemoryTaskRepository::new(),
        delay: Duration::from_millis(300),
    });
    let h = harness_with(FakeToolchain::new(), 5, base_config(), tasks);
    let request = h.request("abandoned", &["a.mp4"], &["x.mp4"]).await;

    // The caller gives up while the record is being created
    let dropped = tokio::time::timeout(Duration::from_millis(50), h.orchestrator.dispatch(request)).await;
    assert!(dropped.is_err());

    let task_id = TaskId::from_string("abandoned");
    let view = h.wait_terminal(&task_id).await;
    assert_eq!(view.status, TaskStatus::Completed);
    assert_eq!(h.balance().await, 4);
    assert_eq!(h.orchestrator.active_tasks(), 0);
}

#[tokio::test]
async fn test_task_timeout_fails_refunds_once_and_cleans_scratch() {
    let config = WorkerConfig {
        task_timeout: Duration::from_millis(100),
        ..base_config()
    };
    let h = harness_with(
        FakeToolchain::new().with_delay(Duration::from_secs(5)),
        5,
        config,
        Arc::new(MemoryTaskRepository::new()),
    );
    let request = h.request("too-slow", &["a.mp4", "b.mp4"], &["x.mp4"]).await;

    let task_id = h.orchestrator.dispatch(request).await.unwrap();
    assert_eq!(h.balance().await, 3);

    let view = h.wait_terminal(&task_id).await;
    assert_eq!(view.status, TaskStatus::Failed);
    assert!(view.outputs.is_none());
    assert_eq!(view.error.map(|e| e.kind), Some(TaskErrorKind::Timeout));

    // Intermediates go with the task directory
    wait_removed(&h.scratch.task_dir(&task_id).unwrap()).await;
    assert_eq!(h.balance().await, 5);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.balance().await, 5);
    assert_eq!(h.orchestrator.active_tasks(), 0);
}

#[tokio::test]
async fn test_sweep_reclaims_undownloaded_outputs() {
    let config = WorkerConfig {
        scratch_retention: Duration::from_millis(300),
        scratch_sweep_interval: Duration::from_millis(20),
        ..base_config()
    };
    let h = harness_with(FakeToolchain::new(), 10, config, Arc::new(MemoryTaskRepository::new()));

    let done = h.request("done", &["a.mp4"], &["x.mp4"]).await;
    let done = h.orchestrator.dispatch(done).await.unwrap();
    assert_eq!(h.wait_terminal(&done).await.status, TaskStatus::Completed);

    wait_removed(&h.scratch.task_dir(&done).unwrap()).await;

    // The record survives; its files are gone
    let archive = h.packager.package(&done).await.unwrap();
    assert!(archive.entries.is_empty());
    assert_eq!(archive.skipped.len(), 1);
}

#[tokio::test]
async fn test_sweep_skips_running_task() {
    let config = WorkerConfig {
        scratch_retention: Duration::from_millis(100),
        scratch_sweep_interval: Duration::from_millis(20),
        ..base_config()
    };
    let h = harness_with(
        FakeToolchain::new().with_delay(Duration::from_secs(30)),
        10,
        config,
        Arc::new(MemoryTaskRepository::new()),
    );

    let running = h.request("running", &["a.mp4"], &["x.mp4"]).await;
    let running = h.orchestrator.dispatch(running).await.unwrap();
    h.wait_started(1).await;

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(h.scratch.task_dir(&running).unwrap().join("uploads/short/a.mp4").exists());

    h.orchestrator.cancel(&running).await.unwrap();
    assert_eq!(h.wait_terminal(&running).await.status, TaskStatus::Failed);
    wait_removed(&h.scratch.task_dir(&running).unwrap()).await;
}
