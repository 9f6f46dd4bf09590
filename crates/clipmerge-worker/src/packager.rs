//! Zip packaging of a completed task's outputs.

use std::collections::HashSet;
use std::io::{Cursor, Write};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use clipmerge_models::{OutputEntry, TaskError, TaskErrorKind, TaskId, TaskStatus};
use clipmerge_store::TaskRepository;

use crate::error::{WorkerError, WorkerResult};
use crate::scratch::ScratchSpace;

/// File name clients receive for every archive.
pub const ARCHIVE_FILE_NAME: &str = "final_videos.zip";

/// An in-memory zip of a task's outputs.
#[derive(Debug, Clone)]
pub struct Archive {
    pub file_name: String,
    pub bytes: Vec<u8>,
    /// Entry names in manifest order
    pub entries: Vec<String>,
    /// Manifest files that no longer existed
    pub skipped: Vec<PathBuf>,
}

/// Builds download archives for completed tasks.
pub struct ResultPackager {
    tasks: Arc<dyn TaskRepository>,
    scratch: ScratchSpace,
    cleanup_after_download: bool,
}

impl ResultPackager {
    pub fn new(tasks: Arc<dyn TaskRepository>, scratch: ScratchSpace, cleanup_after_download: bool) -> Self {
        Self {
            tasks,
            scratch,
            cleanup_after_download,
        }
    }

    /// Package the outputs of a completed task.
    ///
    /// Files missing from scratch storage are skipped. When cleanup is
    /// enabled, the task's scratch directory is removed afterwards.
    pub async fn package(&self, task_id: &TaskId) -> WorkerResult<Archive> {
        let task = self
            .tasks
            .get(task_id)
            .await?
            .ok_or_else(|| WorkerError::task_not_found(task_id.as_str()))?;

        match task.status {
            TaskStatus::Processing => return Err(WorkerError::NotReady(task_id.to_string())),
            TaskStatus::Failed => {
                let error = task
                    .error
                    .unwrap_or_else(|| TaskError::new(TaskErrorKind::Internal, "task failed"));
                return Err(WorkerError::TaskFailed(error));
            }
            TaskStatus::Completed => {}
        }

        let outputs = task.outputs;
        let archive = tokio::task::spawn_blocking(move || build_archive(&outputs))
            .await
            .map_err(|e| WorkerError::internal(format!("archive task panicked: {e}")))??;

        for path in &archive.skipped {
            warn!(task_id = %task_id, "Output missing at packaging time: {}", path.display());
        }
        info!(
            task_id = %task_id,
            entries = archive.entries.len(),
            skipped = archive.skipped.len(),
            bytes = archive.bytes.len(),
            "Archive built"
        );

        if self.cleanup_after_download {
            if let Err(e) = self.scratch.cleanup_task(task_id).await {
                warn!(task_id = %task_id, "Failed to remove scratch directory: {}", e);
            }
        }

        Ok(archive)
    }
}

/// Build a stored (uncompressed) zip of the manifest files that exist.
///
/// Entry names are unique; the last existing file for a name wins.
pub fn build_archive(outputs: &[OutputEntry]) -> WorkerResult<Archive> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    // Video is already compressed
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .large_file(true);

    // A later output with the same entry name replaces an earlier one
    let mut keep = vec![false; outputs.len()];
    let mut named = HashSet::new();
    for (index, output) in outputs.iter().enumerate().rev() {
        if output.path.exists() && named.insert(output.display_name.as_str()) {
            keep[index] = true;
        }
    }

    let mut entries = Vec::new();
    let mut skipped = Vec::new();

    for (output, keep) in outputs.iter().zip(keep) {
        if !keep {
            if !output.path.exists() {
                skipped.push(output.path.clone());
            }
            continue;
        }

        let data = match std::fs::read(&output.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                skipped.push(output.path.clone());
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        writer.start_file(output.display_name.as_str(), options)?;
        writer.write_all(&data)?;
        entries.push(output.display_name.clone());
    }

    let bytes = writer.finish()?.into_inner();

    Ok(Archive {
        file_name: ARCHIVE_FILE_NAME.to_string(),
        bytes,
        entries,
        skipped,
    })
}
