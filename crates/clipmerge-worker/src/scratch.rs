//! Per-task scratch storage.
//!
//! Every task owns `{root}/{task_id}/` with `uploads/short`, `uploads/large`
//! and `outputs` below it. Nothing outside that directory is ever written
//! or removed on a task's behalf.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use clipmerge_models::TaskId;

use crate::error::{WorkerError, WorkerResult};

/// Which collection an uploaded clip belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputRole {
    Short,
    Large,
}

impl InputRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputRole::Short => "short",
            InputRole::Large => "large",
        }
    }
}

/// Root of the per-task scratch directories.
#[derive(Debug, Clone)]
pub struct ScratchSpace {
    root: PathBuf,
}

impl ScratchSpace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Get the scratch root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the scratch root.
    pub async fn init(&self) -> WorkerResult<()> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    fn checked(&self, task_id: &TaskId) -> WorkerResult<PathBuf> {
        if !task_id.is_path_safe() {
            return Err(WorkerError::invalid_request(format!("unsafe task id: {task_id}")));
        }
        Ok(self.root.join(task_id.as_str()))
    }

    /// `{root}/{task_id}`
    pub fn task_dir(&self, task_id: &TaskId) -> WorkerResult<PathBuf> {
        self.checked(task_id)
    }

    /// `{root}/{task_id}/uploads/{role}`
    pub fn uploads_dir(&self, task_id: &TaskId, role: InputRole) -> WorkerResult<PathBuf> {
        Ok(self.checked(task_id)?.join("uploads").join(role.as_str()))
    }

    /// `{root}/{task_id}/outputs`
    pub fn outputs_dir(&self, task_id: &TaskId) -> WorkerResult<PathBuf> {
        Ok(self.checked(task_id)?.join("outputs"))
    }

    /// Create the task's output directory and return it.
    pub async fn prepare_outputs(&self, task_id: &TaskId) -> WorkerResult<PathBuf> {
        let dir = self.outputs_dir(task_id)?;
        fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Create the task's directory, failing if it already exists.
    ///
    /// The directory is created non-recursively, so of two submissions
    /// racing on one id exactly one wins and the other never writes.
    pub async fn claim_task(&self, task_id: &TaskId) -> WorkerResult<PathBuf> {
        let dir = self.checked(task_id)?;
        fs::create_dir_all(&self.root).await?;
        match fs::create_dir(&dir).await {
            Ok(()) => Ok(dir),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(WorkerError::TaskExists(task_id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist one uploaded clip under the task's upload directory.
    pub async fn save_upload(
        &self,
        task_id: &TaskId,
        role: InputRole,
        filename: &str,
        data: &[u8],
    ) -> WorkerResult<PathBuf> {
        let safe_filename = sanitize_filename(filename)?;
        let dir = self.uploads_dir(task_id, role)?;
        fs::create_dir_all(&dir).await?;

        let file_path = dir.join(&safe_filename);
        let mut file = fs::File::create(&file_path).await?;
        file.write_all(data).await?;
        file.flush().await?;

        debug!(task_id = %task_id, role = role.as_str(), path = %file_path.display(), "Saved upload");
        Ok(file_path)
    }

    /// Remove the task's scratch directory. Missing directories are fine.
    pub async fn cleanup_task(&self, task_id: &TaskId) -> WorkerResult<()> {
        let dir = self.checked(task_id)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!(task_id = %task_id, "Removed scratch directory");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove task directories not modified for at least `max_age`.
    ///
    /// Directories of tasks in `busy` are left alone. Returns the ids removed.
    pub async fn sweep(&self, max_age: Duration, busy: &HashSet<TaskId>) -> WorkerResult<Vec<TaskId>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut removed = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let task_id = TaskId::from_string(name);
            if !task_id.is_path_safe() || busy.contains(&task_id) {
                continue;
            }

            // Entries removed concurrently are simply skipped
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if !metadata.is_dir() {
                continue;
            }
            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| modified.elapsed().ok())
                .unwrap_or_default();
            if age < max_age {
                continue;
            }

            self.cleanup_task(&task_id).await?;
            removed.push(task_id);
        }

        Ok(removed)
    }
}

/// Reduce a client-supplied name to a single safe path component.
pub fn sanitize_filename(filename: &str) -> WorkerResult<String> {
    // Browsers on Windows may send full paths
    let last = filename.rsplit(['/', '\\']).next().unwrap_or(filename);

    if last.is_empty() || last.contains('\0') || last.starts_with('.') {
        return Err(WorkerError::invalid_request(format!("invalid filename: {filename:?}")));
    }

    let sanitized: String = last
        .chars()
        .map(|c| match c {
            ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    Ok(sanitized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("clip.mp4").unwrap(), "clip.mp4");
        assert_eq!(sanitize_filename("C:\\Users\\me\\clip.mp4").unwrap(), "clip.mp4");
        assert_eq!(sanitize_filename("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_filename("what?.mp4").unwrap(), "what_.mp4");
        assert!(sanitize_filename("..").is_err());
        assert!(sanitize_filename(".hidden.mp4").is_err());
        assert!(sanitize_filename("dir/").is_err());
        assert!(sanitize_filename("a\0b.mp4").is_err());
    }

    #[test]
    fn test_layout() {
        let scratch = ScratchSpace::new("/scratch");
        let id = TaskId::from_string("t1");
        assert_eq!(scratch.task_dir(&id).unwrap(), PathBuf::from("/scratch/t1"));
        assert_eq!(
            scratch.uploads_dir(&id, InputRole::Large).unwrap(),
            PathBuf::from("/scratch/t1/uploads/large")
        );
        assert_eq!(scratch.outputs_dir(&id).unwrap(), PathBuf::from("/scratch/t1/outputs"));
        assert!(scratch.task_dir(&TaskId::from_string("../t2")).is_err());
    }

    #[tokio::test]
    async fn test_cleanup_only_touches_own_task() {
        let root = tempfile::tempdir().unwrap();
        let scratch = ScratchSpace::new(root.path());
        let a = TaskId::from_string("task-a");
        let b = TaskId::from_string("task-b");

        let a_file = scratch.save_upload(&a, InputRole::Short, "x.mp4", b"a").await.unwrap();
        let b_file = scratch.save_upload(&b, InputRole::Short, "x.mp4", b"b").await.unwrap();
        assert_ne!(a_file, b_file);

        scratch.cleanup_task(&a).await.unwrap();
        assert!(!a_file.exists());
        assert!(b_file.exists());

        // Second cleanup is a no-op
        scratch.cleanup_task(&a).await.unwrap();
    }

    #[tokio::test]
    async fn test_claim_task_is_exclusive() {
        let root = tempfile::tempdir().unwrap();
        let scratch = ScratchSpace::new(root.path().join("scratch"));
        let id = TaskId::from_string("race");

        let dir = scratch.claim_task(&id).await.unwrap();
        assert!(dir.is_dir());
        let winner = scratch.save_upload(&id, InputRole::Short, "a.mp4", b"winner").await.unwrap();

        assert!(matches!(scratch.claim_task(&id).await, Err(WorkerError::TaskExists(_))));
        assert_eq!(std::fs::read(&winner).unwrap(), b"winner");
        assert!(scratch.claim_task(&TaskId::from_string("../race")).await.is_err());
    }

    #[tokio::test]
    async fn test_sweep_respects_age_and_busy_tasks() {
        let root = tempfile::tempdir().unwrap();
        let scratch = ScratchSpace::new(root.path());
        let idle = TaskId::from_string("idle");
        let busy = TaskId::from_string("busy");
        scratch.save_upload(&idle, InputRole::Short, "a.mp4", b"a").await.unwrap();
        scratch.save_upload(&busy, InputRole::Short, "a.mp4", b"a").await.unwrap();
        std::fs::write(root.path().join("stray.txt"), b"x").unwrap();

        let busy_set: HashSet<TaskId> = [busy.clone()].into_iter().collect();

        // Nothing is old enough yet
        let removed = scratch.sweep(Duration::from_secs(3600), &busy_set).await.unwrap();
        assert!(removed.is_empty());
        assert!(scratch.task_dir(&idle).unwrap().exists());

        let removed = scratch.sweep(Duration::ZERO, &busy_set).await.unwrap();
        assert_eq!(removed, vec![idle.clone()]);
        assert!(!scratch.task_dir(&idle).unwrap().exists());
        assert!(scratch.task_dir(&busy).unwrap().exists());
        assert!(root.path().join("stray.txt").exists());
    }

    #[tokio::test]
    async fn test_sweep_of_missing_root() {
        let root = tempfile::tempdir().unwrap();
        let scratch = ScratchSpace::new(root.path().join("never-created"));
        assert!(scratch.sweep(Duration::ZERO, &HashSet::new()).await.unwrap().is_empty());
    }
}
