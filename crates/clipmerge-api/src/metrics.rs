//! Prometheus metrics for the API server.

use std::sync::LazyLock;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use regex_lite::Regex;

/// Install the Prometheus recorder and return the render handle.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    pub const HTTP_REQUESTS_TOTAL: &str = "clipmerge_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "clipmerge_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "clipmerge_http_requests_in_flight";
    pub const UPLOAD_BYTES_TOTAL: &str = "clipmerge_upload_bytes_total";
    pub const ARCHIVE_BYTES_TOTAL: &str = "clipmerge_archive_bytes_total";
    pub const RATE_LIMIT_HITS_TOTAL: &str = "clipmerge_rate_limit_hits_total";
}

static TASK_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/api/tasks/[A-Za-z0-9_-]+").expect("valid task path pattern"));
static ACCOUNT_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/api/accounts/[A-Za-z0-9_.@-]+").expect("valid account path pattern"));

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record bytes received as clip uploads.
pub fn record_upload_bytes(role: &'static str, bytes: usize) {
    counter!(names::UPLOAD_BYTES_TOTAL, "role" => role).increment(bytes as u64);
}

/// Record bytes served as archives.
pub fn record_archive_bytes(bytes: usize) {
    counter!(names::ARCHIVE_BYTES_TOTAL).increment(bytes as u64);
}

/// Record rate limit hit.
pub fn record_rate_limit_hit(endpoint: &str) {
    let labels = [("endpoint", sanitize_path(endpoint))];
    counter!(names::RATE_LIMIT_HITS_TOTAL, &labels).increment(1);
}

/// Replace task and account ids with placeholders to bound label cardinality.
fn sanitize_path(path: &str) -> String {
    let path = TASK_PATH.replace_all(path, "/api/tasks/:task_id");
    let path = ACCOUNT_PATH.replace_all(&path, "/api/accounts/:account_id");
    path.to_string()
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);

    let response = next.run(request).await;

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    let duration = start.elapsed().as_secs_f64();

    record_http_request(&method, &path, status, duration);

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_path() {
        assert_eq!(
            sanitize_path("/api/tasks/550e8400-e29b-41d4-a716-446655440000/status"),
            "/api/tasks/:task_id/status"
        );
        assert_eq!(
            sanitize_path("/api/accounts/user@example.com/credits"),
            "/api/accounts/:account_id/credits"
        );
        assert_eq!(sanitize_path("/health"), "/health");
    }
}
