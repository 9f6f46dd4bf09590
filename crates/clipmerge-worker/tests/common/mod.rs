//! Shared fixtures: a recording media toolchain that never spawns a process.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use clipmerge_media::{MediaError, MediaResult, MediaToolchain, ToolOutcome};
use clipmerge_models::{base_name, Resolution};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Probe(PathBuf),
    PreprocessStart(PathBuf),
    PreprocessEnd {
        input: PathBuf,
        output: PathBuf,
        reference: Option<Resolution>,
    },
    ConcatStart(PathBuf),
    ConcatEnd(PathBuf),
}

/// Fake toolchain writing small marker files instead of video.
pub struct FakeToolchain {
    /// `None` makes every probe fail
    pub resolution: Option<Resolution>,
    /// Time each preprocess/concat unit takes
    pub delay: Duration,
    /// Short clips (by base name) whose preprocessing fails
    pub failing_preprocess: HashSet<String>,
    /// Short clips (by base name) whose preprocessed output vanishes right away
    pub vanishing_preprocess: HashSet<String>,
    calls: Mutex<Vec<Call>>,
}

impl FakeToolchain {
    pub fn new() -> Self {
        Self {
            resolution: Some(Resolution::new(1080, 1920)),
            delay: Duration::from_millis(5),
            failing_preprocess: HashSet::new(),
            vanishing_preprocess: HashSet::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn without_resolution(mut self) -> Self {
        self.resolution = None;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_preprocess(mut self, short_base: &str) -> Self {
        self.failing_preprocess.insert(short_base.to_string());
        self
    }

    pub fn vanishing_preprocess(mut self, short_base: &str) -> Self {
        self.vanishing_preprocess.insert(short_base.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn probe_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Probe(_)))
            .count()
    }

    pub fn preprocess_ends(&self) -> Vec<(PathBuf, Option<Resolution>)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::PreprocessEnd { input, reference, .. } => Some((input, reference)),
                _ => None,
            })
            .collect()
    }

    pub fn concat_starts(&self) -> Vec<PathBuf> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::ConcatStart(output) => Some(output),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    async fn work(&self, cancel: &mut watch::Receiver<bool>) -> MediaResult<()> {
        tokio::select! {
            _ = tokio::time::sleep(self.delay) => Ok(()),
            _ = wait_for_cancel(cancel) => Err(MediaError::Cancelled),
        }
    }
}

async fn wait_for_cancel(cancel: &mut watch::Receiver<bool>) {
    while !*cancel.borrow() {
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn outcome() -> ToolOutcome {
    ToolOutcome {
        exit_code: Some(0),
        stderr_tail: String::new(),
        elapsed: Duration::from_millis(1),
    }
}

#[async_trait]
impl MediaToolchain for FakeToolchain {
    async fn probe_resolution(&self, path: &Path, _cancel: watch::Receiver<bool>) -> MediaResult<Resolution> {
        self.record(Call::Probe(path.to_path_buf()));
        self.resolution
            .ok_or_else(|| MediaError::ResolutionUnavailable(path.to_path_buf()))
    }

    async fn preprocess(
        &self,
        input: &Path,
        output: &Path,
        reference: Option<Resolution>,
        mut cancel: watch::Receiver<bool>,
    ) -> MediaResult<ToolOutcome> {
        self.record(Call::PreprocessStart(input.to_path_buf()));
        self.work(&mut cancel).await?;

        let base = base_name(input);
        if self.failing_preprocess.contains(&base) {
            return Err(MediaError::ffmpeg_failed(
                format!("cannot decode {}", input.display()),
                Some("Invalid data found when processing input".to_string()),
                Some(1),
            ));
        }

        tokio::fs::write(output, format!("pre:{base}")).await?;
        if self.vanishing_preprocess.contains(&base) {
            tokio::fs::remove_file(output).await?;
        }

        self.record(Call::PreprocessEnd {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            reference,
        });
        Ok(outcome())
    }

    async fn concatenate(
        &self,
        inputs: &[PathBuf],
        output: &Path,
        mut cancel: watch::Receiver<bool>,
    ) -> MediaResult<ToolOutcome> {
        self.record(Call::ConcatStart(output.to_path_buf()));
        for input in inputs {
            if !input.exists() {
                return Err(MediaError::FileNotFound(input.clone()));
            }
        }
        self.work(&mut cancel).await?;

        tokio::fs::write(output, b"merged").await?;
        self.record(Call::ConcatEnd(output.to_path_buf()));
        Ok(outcome())
    }
}

/// Write a placeholder clip and return its path.
pub fn write_clip(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, name.as_bytes()).unwrap();
    path
}
