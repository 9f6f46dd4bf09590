//! Task pipeline metrics.

use metrics::{counter, gauge, histogram};

use clipmerge_models::TaskErrorKind;

/// Metric names as constants for consistency.
pub mod names {
    pub const TASKS_DISPATCHED_TOTAL: &str = "clipmerge_tasks_dispatched_total";
    pub const TASKS_REJECTED_TOTAL: &str = "clipmerge_tasks_rejected_total";
    pub const TASKS_COMPLETED_TOTAL: &str = "clipmerge_tasks_completed_total";
    pub const TASKS_FAILED_TOTAL: &str = "clipmerge_tasks_failed_total";
    pub const TASKS_RUNNING: &str = "clipmerge_tasks_running";
    pub const TASK_DURATION_SECONDS: &str = "clipmerge_task_duration_seconds";
    pub const PAIRINGS_PRODUCED_TOTAL: &str = "clipmerge_pairings_produced_total";
    pub const PAIRINGS_FAILED_TOTAL: &str = "clipmerge_pairings_failed_total";
    pub const CREDITS_DEBITED_TOTAL: &str = "clipmerge_credits_debited_total";
    pub const CREDITS_REFUNDED_TOTAL: &str = "clipmerge_credits_refunded_total";
    pub const SCRATCH_SWEPT_TOTAL: &str = "clipmerge_scratch_swept_total";
}

/// Record a task accepted into the queue.
pub fn record_task_dispatched() {
    counter!(names::TASKS_DISPATCHED_TOTAL).increment(1);
}

/// Record a dispatch turned away before any work was queued.
pub fn record_task_rejected(reason: &'static str) {
    counter!(names::TASKS_REJECTED_TOTAL, "reason" => reason).increment(1);
}

/// Record a completed task.
pub fn record_task_completed(duration_secs: f64, pairings: usize) {
    counter!(names::TASKS_COMPLETED_TOTAL).increment(1);
    counter!(names::PAIRINGS_PRODUCED_TOTAL).increment(pairings as u64);
    histogram!(names::TASK_DURATION_SECONDS, "status" => "completed").record(duration_secs);
}

/// Record a failed task.
pub fn record_task_failed(kind: TaskErrorKind, duration_secs: f64) {
    counter!(names::TASKS_FAILED_TOTAL, "kind" => kind.as_str()).increment(1);
    histogram!(names::TASK_DURATION_SECONDS, "status" => "failed").record(duration_secs);
}

/// Record pairings that did not produce an output.
pub fn record_pairings_failed(count: usize) {
    counter!(names::PAIRINGS_FAILED_TOTAL).increment(count as u64);
}

/// Adjust the running tasks gauge.
pub fn adjust_running_tasks(delta: f64) {
    gauge!(names::TASKS_RUNNING).increment(delta);
}

/// Record credits taken at dispatch.
pub fn record_credits_debited(units: u64) {
    counter!(names::CREDITS_DEBITED_TOTAL).increment(units);
}

/// Record credits returned after a failure.
pub fn record_credits_refunded(units: u64) {
    counter!(names::CREDITS_REFUNDED_TOTAL).increment(units);
}

/// Record scratch directories removed by the retention sweep.
pub fn record_scratch_swept(count: usize) {
    counter!(names::SCRATCH_SWEPT_TOTAL).increment(count as u64);
}
