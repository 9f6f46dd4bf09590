//! Merge task processing.
//!
//! This crate provides:
//! - The pairing engine (probe, preprocess, cross-product concatenation)
//! - A bounded task queue with a fixed worker pool
//! - Credit debit at dispatch and refund on failure
//! - Zip packaging of finished outputs
//! - Status lookups for polling clients

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod packager;
pub mod pairing;
pub mod retry;
pub mod scratch;
pub mod status;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use logging::TaskLogger;
pub use orchestrator::{DispatchRequest, TaskOrchestrator};
pub use packager::{build_archive, Archive, ResultPackager, ARCHIVE_FILE_NAME};
pub use pairing::{PairingEngine, PairingJob, PairingReport, UnitFailure};
pub use retry::{with_backoff, Backoff};
pub use scratch::{sanitize_filename, InputRole, ScratchSpace};
pub use status::{StatusReporter, TaskStatusView};
