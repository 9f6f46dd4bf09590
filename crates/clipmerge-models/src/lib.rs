//! Shared data models for the clip merge pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Merge tasks and their lifecycle status
//! - Classified task errors
//! - Encoding configuration for preprocessing and concatenation
//! - Output naming for intermediate and final clips

pub mod encoding;
pub mod naming;
pub mod resolution;
pub mod task;
pub mod task_status;

// Re-export common types
pub use encoding::EncodingConfig;
pub use naming::{base_name, pairing_file_name, preprocessed_file_name, DEFAULT_OUTPUT_EXT};
pub use resolution::Resolution;
pub use task::{OutputEntry, Task, TaskError, TaskErrorKind, TaskId, TransitionError};
pub use task_status::TaskStatus;
