//! Worker configuration.

use std::time::Duration;

use clipmerge_models::DEFAULT_OUTPUT_EXT;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Tasks running at the same time (worker pool size)
    pub max_concurrent_tasks: usize,
    /// Dispatched tasks allowed to wait for a worker before new ones are rejected
    pub queue_capacity: usize,
    /// Concurrent FFmpeg processes in the preprocessing stage of one task
    pub preprocess_parallelism: usize,
    /// Concurrent FFmpeg processes in the concatenation stage of one task
    pub concat_parallelism: usize,
    /// Deadline for a whole task run
    pub task_timeout: Duration,
    /// Deadline for a single FFmpeg/FFprobe invocation (None disables it)
    pub ffmpeg_timeout: Option<Duration>,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Root of the per-task scratch directories
    pub scratch_dir: String,
    /// Fail the task when the reference resolution cannot be probed
    pub strict_probe: bool,
    /// Container extension for generated clips
    pub output_ext: String,
    /// Remove a task's scratch directory once its archive has been built
    pub cleanup_after_download: bool,
    /// Idle scratch directories of finished tasks older than this are swept
    pub scratch_retention: Duration,
    /// How often the scratch sweep runs
    pub scratch_sweep_interval: Duration,
}

fn host_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 2,
            queue_capacity: 16,
            preprocess_parallelism: host_parallelism(),
            concat_parallelism: host_parallelism(),
            task_timeout: Duration::from_secs(3600), // 1 hour
            ffmpeg_timeout: Some(Duration::from_secs(900)),
            shutdown_timeout: Duration::from_secs(30),
            scratch_dir: "/tmp/clipmerge".to_string(),
            strict_probe: false,
            output_ext: DEFAULT_OUTPUT_EXT.to_string(),
            cleanup_after_download: true,
            scratch_retention: Duration::from_secs(24 * 3600),
            scratch_sweep_interval: Duration::from_secs(600),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_tasks: std::env::var("WORKER_MAX_TASKS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_concurrent_tasks),
            queue_capacity: std::env::var("WORKER_QUEUE_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.queue_capacity),
            preprocess_parallelism: std::env::var("WORKER_PREPROCESS_PARALLEL")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.preprocess_parallelism),
            concat_parallelism: std::env::var("WORKER_CONCAT_PARALLEL")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.concat_parallelism),
            task_timeout: Duration::from_secs(
                std::env::var("WORKER_TASK_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3600),
            ),
            // 0 disables the per-invocation deadline
            ffmpeg_timeout: std::env::var("WORKER_FFMPEG_TIMEOUT")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .map(|secs| (secs > 0).then(|| Duration::from_secs(secs)))
                .unwrap_or(defaults.ffmpeg_timeout),
            shutdown_timeout: Duration::from_secs(
                std::env::var("WORKER_SHUTDOWN_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            scratch_dir: std::env::var("WORKER_SCRATCH_DIR").unwrap_or(defaults.scratch_dir),
            strict_probe: std::env::var("WORKER_STRICT_PROBE")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            output_ext: std::env::var("WORKER_OUTPUT_EXT")
                .ok()
                .filter(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric()))
                .unwrap_or(defaults.output_ext),
            cleanup_after_download: std::env::var("WORKER_CLEANUP_AFTER_DOWNLOAD")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
            scratch_retention: std::env::var("WORKER_SCRATCH_RETENTION")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.scratch_retention),
            scratch_sweep_interval: std::env::var("WORKER_SCRATCH_SWEEP_INTERVAL")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.scratch_sweep_interval),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_bounded() {
        let config = WorkerConfig::default();
        assert!(config.max_concurrent_tasks > 0);
        assert!(config.queue_capacity > 0);
        assert!(config.preprocess_parallelism > 0);
        assert!(!config.strict_probe);
        assert_eq!(config.output_ext, "mp4");
        assert!(config.scratch_retention > config.task_timeout);
        assert!(!config.scratch_sweep_interval.is_zero());
    }
}
