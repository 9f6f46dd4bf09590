//! Application state.

use std::sync::Arc;

use clipmerge_media::{FfmpegToolchain, MediaToolchain};
use clipmerge_store::Stores;
use clipmerge_worker::{PairingEngine, ResultPackager, ScratchSpace, StatusReporter, TaskOrchestrator, WorkerConfig};

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub stores: Stores,
    pub scratch: ScratchSpace,
    pub orchestrator: Arc<TaskOrchestrator>,
    pub status: StatusReporter,
    pub packager: Arc<ResultPackager>,
}

impl AppState {
    /// Create new application state from the environment.
    pub async fn new(config: ApiConfig, worker_config: WorkerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let stores = Stores::from_env()?;

        let mut toolchain = FfmpegToolchain::detect()?;
        if let Some(timeout) = worker_config.ffmpeg_timeout {
            toolchain = toolchain.with_timeout(timeout.as_secs());
        }

        Ok(Self::with_parts(config, worker_config, stores, Arc::new(toolchain)).await?)
    }

    /// Assemble state from explicit stores and toolchain.
    pub async fn with_parts(
        config: ApiConfig,
        worker_config: WorkerConfig,
        stores: Stores,
        toolchain: Arc<dyn MediaToolchain>,
    ) -> Result<Self, clipmerge_worker::WorkerError> {
        let scratch = ScratchSpace::new(&worker_config.scratch_dir);
        scratch.init().await?;

        let engine = PairingEngine::new(toolchain, &worker_config);
        let packager = ResultPackager::new(
            Arc::clone(&stores.tasks),
            scratch.clone(),
            worker_config.cleanup_after_download,
        );
        let orchestrator = TaskOrchestrator::start(
            worker_config,
            Arc::clone(&stores.tasks),
            Arc::clone(&stores.credits),
            engine,
            scratch.clone(),
        );

        Ok(Self {
            config,
            status: StatusReporter::new(Arc::clone(&stores.tasks)),
            stores,
            scratch,
            orchestrator: Arc::new(orchestrator),
            packager: Arc::new(packager),
        })
    }
}
