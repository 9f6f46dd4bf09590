//! Cross-product pairing of short clips with large clips.
//!
//! A run has two stages joined by a barrier. Every short clip is first
//! normalized against the resolution of the first large clip; only when
//! all of them have finished does concatenation of each
//! `(large, short)` pair begin. Each stage has its own concurrency bound.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, info};

use clipmerge_media::{MediaError, MediaToolchain};
use clipmerge_models::{
    base_name, pairing_file_name, preprocessed_file_name, OutputEntry, Resolution, TaskErrorKind, TaskId,
};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::TaskLogger;

/// Inputs of one pairing run.
#[derive(Debug, Clone)]
pub struct PairingJob {
    pub task_id: TaskId,
    pub short_inputs: Vec<PathBuf>,
    pub large_inputs: Vec<PathBuf>,
    /// Directory receiving intermediate and final clips
    pub output_dir: PathBuf,
}

/// A pairing that did not produce an output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFailure {
    pub display_name: String,
    pub kind: TaskErrorKind,
    pub message: String,
}

/// Outcome of a pairing run.
#[derive(Debug, Clone, Default)]
pub struct PairingReport {
    /// Successful outputs in (large, short) generation order
    pub outputs: Vec<OutputEntry>,
    /// Pairings that failed, in the same order
    pub failures: Vec<UnitFailure>,
    /// Reference resolution used for preprocessing
    pub reference: Option<Resolution>,
}

impl PairingReport {
    /// Number of pairings attempted.
    pub fn total_units(&self) -> usize {
        self.outputs.len() + self.failures.len()
    }

    /// The manifest, or an error summarizing the failed pairings.
    pub fn into_manifest(self) -> WorkerResult<Vec<OutputEntry>> {
        let total = self.total_units();
        match self.failures.first() {
            None => Ok(self.outputs),
            Some(first) => Err(WorkerError::PairingsFailed {
                failed: self.failures.len(),
                total,
                first: format!("{}: {}", first.display_name, first.message),
                kind: first.kind,
            }),
        }
    }
}

struct PreprocessedClip {
    short_base: String,
    path: PathBuf,
}

/// Hands out file names unique within one output directory.
///
/// Inputs sharing a base name would otherwise map to the same intermediate
/// or final path and be written by concurrent tool invocations.
#[derive(Debug, Default)]
struct NameAllocator {
    taken: HashSet<String>,
}

impl NameAllocator {
    /// `name` itself when free, otherwise `{stem}-{n}.{ext}` for the lowest free `n >= 2`.
    fn claim(&mut self, name: &str) -> String {
        if self.taken.insert(name.to_string()) {
            return name.to_string();
        }

        let (stem, ext) = match name.rsplit_once('.') {
            Some((stem, ext)) => (stem, format!(".{ext}")),
            None => (name, String::new()),
        };
        let mut n = 2;
        loop {
            let candidate = format!("{stem}-{n}{ext}");
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}

/// Drives the prober, preprocessor and concatenator for one task.
pub struct PairingEngine {
    toolchain: Arc<dyn MediaToolchain>,
    preprocess_parallelism: usize,
    concat_parallelism: usize,
    strict_probe: bool,
    output_ext: String,
}

impl PairingEngine {
    pub fn new(toolchain: Arc<dyn MediaToolchain>, config: &WorkerConfig) -> Self {
        Self {
            toolchain,
            preprocess_parallelism: config.preprocess_parallelism.max(1),
            concat_parallelism: config.concat_parallelism.max(1),
            strict_probe: config.strict_probe,
            output_ext: config.output_ext.clone(),
        }
    }

    /// Run the full pairing pipeline.
    ///
    /// Empty short or large inputs yield an empty report without invoking
    /// any tool. A failed preprocessing unit aborts the run; a failed
    /// concatenation unit is reported without stopping its siblings.
    pub async fn run(&self, job: &PairingJob, cancel: watch::Receiver<bool>) -> WorkerResult<PairingReport> {
        let logger = TaskLogger::new(&job.task_id, "pairing");

        if job.short_inputs.is_empty() || job.large_inputs.is_empty() {
            logger.log_warning("No short or no large inputs, nothing to pair");
            return Ok(PairingReport::default());
        }

        ensure_not_cancelled(&cancel)?;
        tokio::fs::create_dir_all(&job.output_dir).await?;

        let reference = self.reference_resolution(job, &cancel, &logger).await?;
        let mut names = NameAllocator::default();

        logger.log_stage("preprocess", job.short_inputs.len());
        let preprocessed = self.preprocess_all(job, reference, &mut names, &cancel).await?;

        logger.log_stage("concatenate", job.short_inputs.len() * job.large_inputs.len());
        let concat_result = self.concatenate_all(job, &preprocessed, &mut names, &cancel).await;

        remove_intermediates(&preprocessed, &logger).await;

        let (outputs, failures) = concat_result?;
        if !failures.is_empty() {
            crate::metrics::record_pairings_failed(failures.len());
        }

        info!(
            task_id = %job.task_id,
            produced = outputs.len(),
            failed = failures.len(),
            "Pairing run finished"
        );

        Ok(PairingReport {
            outputs,
            failures,
            reference,
        })
    }

    async fn reference_resolution(
        &self,
        job: &PairingJob,
        cancel: &watch::Receiver<bool>,
        logger: &TaskLogger,
    ) -> WorkerResult<Option<Resolution>> {
        let first_large = &job.large_inputs[0];

        match self.toolchain.probe_resolution(first_large, cancel.clone()).await {
            Ok(resolution) => {
                info!(
                    task_id = %job.task_id,
                    reference = %resolution,
                    "Reference resolution from {}",
                    first_large.display()
                );
                Ok(Some(resolution))
            }
            Err(MediaError::Cancelled) => Err(WorkerError::Cancelled),
            Err(e) if self.strict_probe => Err(WorkerError::ProbeFailed(e)),
            Err(e) => {
                logger.log_warning(&format!(
                    "Could not probe {} ({}), preprocessing without scaling",
                    first_large.display(),
                    e
                ));
                Ok(None)
            }
        }
    }

    async fn preprocess_all(
        &self,
        job: &PairingJob,
        reference: Option<Resolution>,
        names: &mut NameAllocator,
        cancel: &watch::Receiver<bool>,
    ) -> WorkerResult<Vec<PreprocessedClip>> {
        let semaphore = Arc::new(Semaphore::new(self.preprocess_parallelism));

        let clips: Vec<PreprocessedClip> = job
            .short_inputs
            .iter()
            .map(|input| {
                let short_base = base_name(input);
                let file_name = names.claim(&preprocessed_file_name(&short_base, &self.output_ext));
                PreprocessedClip {
                    short_base,
                    path: job.output_dir.join(file_name),
                }
            })
            .collect();

        let units = job.short_inputs.iter().zip(&clips).map(|(input, clip)| {
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| MediaError::internal("preprocess semaphore closed"))?;
                if *cancel.borrow() {
                    return Err(MediaError::Cancelled);
                }
                debug!(input = %input.display(), "Preprocess unit started");
                self.toolchain
                    .preprocess(input, &clip.path, reference, cancel)
                    .await
            }
        });

        // Barrier: every unit settles before concatenation may start
        let results = join_all(units).await;

        let first_error = job
            .short_inputs
            .iter()
            .zip(results)
            .find_map(|(input, result)| result.err().map(|e| (input, e)));

        match first_error {
            None => Ok(clips),
            Some((_, MediaError::Cancelled)) => {
                remove_files(clips.iter().map(|c| c.path.as_path())).await;
                Err(WorkerError::Cancelled)
            }
            Some((input, source)) => {
                remove_files(clips.iter().map(|c| c.path.as_path())).await;
                Err(WorkerError::PreprocessFailed {
                    clip: input.display().to_string(),
                    source,
                })
            }
        }
    }

    async fn concatenate_all(
        &self,
        job: &PairingJob,
        preprocessed: &[PreprocessedClip],
        names: &mut NameAllocator,
        cancel: &watch::Receiver<bool>,
    ) -> WorkerResult<(Vec<OutputEntry>, Vec<UnitFailure>)> {
        let semaphore = Arc::new(Semaphore::new(self.concat_parallelism));

        // Outer loop over large clips, inner loop over short clips
        let mut plan = Vec::with_capacity(preprocessed.len() * job.large_inputs.len());
        for large in &job.large_inputs {
            let large_base = base_name(large);
            for clip in preprocessed {
                // Clients see the deterministic name even when the file on disk differs
                let display_name = pairing_file_name(&clip.short_base, &large_base, &self.output_ext);
                plan.push((
                    vec![clip.path.clone(), large.clone()],
                    job.output_dir.join(names.claim(&display_name)),
                    display_name,
                ));
            }
        }

        let units = plan.iter().map(|(inputs, output, display_name)| {
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| MediaError::internal("concat semaphore closed"))?;
                if *cancel.borrow() {
                    return Err(MediaError::Cancelled);
                }
                debug!(output = %display_name, "Concat unit started");
                self.toolchain.concatenate(inputs, output, cancel).await
            }
        });

        // Barrier: the manifest is only built once every pairing settled
        let results = join_all(units).await;

        let mut outputs = Vec::new();
        let mut failures = Vec::new();
        let mut cancelled = false;

        for ((_, output, display_name), result) in plan.into_iter().zip(results) {
            match result {
                Ok(_) => outputs.push(OutputEntry::new(output, display_name)),
                Err(e) => {
                    if matches!(e, MediaError::Cancelled) {
                        cancelled = true;
                    }
                    failures.push(UnitFailure {
                        display_name,
                        kind: e.kind(),
                        message: e.to_string(),
                    });
                }
            }
        }

        if cancelled {
            remove_files(outputs.iter().map(|o| o.path.as_path())).await;
            return Err(WorkerError::Cancelled);
        }

        Ok((outputs, failures))
    }
}

fn ensure_not_cancelled(cancel: &watch::Receiver<bool>) -> WorkerResult<()> {
    if *cancel.borrow() {
        Err(WorkerError::Cancelled)
    } else {
        Ok(())
    }
}

async fn remove_intermediates(preprocessed: &[PreprocessedClip], logger: &TaskLogger) {
    for clip in preprocessed {
        match tokio::fs::remove_file(&clip.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => logger.log_warning(&format!(
                "Failed to remove intermediate {}: {}",
                clip.path.display(),
                e
            )),
        }
    }
}

async fn remove_files<'a>(paths: impl Iterator<Item = &'a Path>) {
    for path in paths {
        let _ = tokio::fs::remove_file(path).await;
    }
}
