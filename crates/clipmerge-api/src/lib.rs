//! Axum HTTP API for the clip merge service.
//!
//! This crate provides:
//! - Multipart task submission backed by the in-process worker pool
//! - Status polling, archive download and cancellation
//! - Credit balance lookups and grants
//! - Rate limiting, security headers and Prometheus metrics

pub mod account;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use account::AccountId;
pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
