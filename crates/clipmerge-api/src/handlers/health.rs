//! Liveness and readiness probes.

use std::fmt::Display;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use clipmerge_media::{check_ffmpeg, check_ffprobe};
use clipmerge_store::TaskRepository;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: String,
}

/// Liveness: the process is up.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Outcome of one dependency check.
#[derive(Serialize)]
pub struct Check {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl Check {
    fn from_result<T, E: Display>(result: Result<T, E>) -> Self {
        match result {
            Ok(_) => Self {
                status: "ok",
                error: None,
                latency_ms: None,
            },
            Err(e) => Self {
                status: "error",
                error: Some(e.to_string()),
                latency_ms: None,
            },
        }
    }

    fn timed(mut self, started: Instant) -> Self {
        self.latency_ms = Some(started.elapsed().as_millis() as u64);
        self
    }

    fn passed(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Serialize)]
pub struct ReadinessChecks {
    pub store: Check,
    pub worker: Check,
    pub ffmpeg: Check,
    pub ffprobe: Check,
}

#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub checks: ReadinessChecks,
}

/// Readiness: the task store answers, the worker pool accepts work and
/// both media tools are on the `PATH`.
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    let started = Instant::now();
    let store = Check::from_result(state.stores.tasks.ping().await).timed(started);

    let worker = Check::from_result(if state.orchestrator.is_accepting() {
        Ok(())
    } else {
        Err("worker pool is shutting down")
    });

    let checks = ReadinessChecks {
        store,
        worker,
        ffmpeg: Check::from_result(check_ffmpeg()),
        ffprobe: Check::from_result(check_ffprobe()),
    };

    let ready = [&checks.store, &checks.worker, &checks.ffmpeg, &checks.ffprobe]
        .iter()
        .all(|c| c.passed());
    let (code, status) = if ready {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (code, Json(ReadinessResponse { status, checks }))
}
