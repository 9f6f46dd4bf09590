#![deny(unreachable_patterns)]
//! FFmpeg CLI wrapper for the clip merge pipeline.
//!
//! This crate provides:
//! - Multi-input FFmpeg command building
//! - A process runner with timeouts, cancellation and captured stderr
//! - Resolution probing via ffprobe
//! - Clip normalization (scale, pad, re-encode) and concatenation
//! - The [`MediaToolchain`] seam used by the pairing engine

pub mod command;
pub mod concat;
pub mod error;
pub mod filters;
pub mod preprocess;
pub mod probe;
pub mod toolchain;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner, ToolOutcome};
pub use concat::concatenate_clips;
pub use error::{MediaError, MediaResult};
pub use preprocess::preprocess_clip;
pub use probe::{parse_resolution_output, probe_resolution};
pub use toolchain::{FfmpegToolchain, MediaToolchain};
