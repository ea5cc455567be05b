//! Prometheus metrics for the API server.

use std::sync::LazyLock;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use genq_models::JobKind;
use genq_queue::RouteOutcome;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use regex_lite::Regex;

/// Install the Prometheus recorder.
/// Returns a handle that renders the scrape output.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "genq_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "genq_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "genq_http_requests_in_flight";

    // WebSocket metrics
    pub const WS_CONNECTIONS_TOTAL: &str = "genq_ws_connections_total";
    pub const WS_CONNECTIONS_ACTIVE: &str = "genq_ws_connections_active";

    // Queue metrics
    pub const JOBS_ENQUEUED_TOTAL: &str = "genq_jobs_enqueued_total";
    pub const QUEUE_LENGTH: &str = "genq_queue_length";
    pub const QUEUE_PROCESSING: &str = "genq_queue_processing";

    // Relay metrics
    pub const RELAY_MESSAGES_TOTAL: &str = "genq_relay_messages_total";
}

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

pub fn record_ws_connection() {
    counter!(names::WS_CONNECTIONS_TOTAL).increment(1);
}

pub fn set_ws_active_connections(count: i64) {
    gauge!(names::WS_CONNECTIONS_ACTIVE).set(count as f64);
}

pub fn record_job_enqueued(kind: JobKind) {
    counter!(names::JOBS_ENQUEUED_TOTAL, "kind" => kind.as_str()).increment(1);
}

/// Update the queue gauges from a status read.
pub fn set_queue_depth(waiting: u64, processing: u64) {
    gauge!(names::QUEUE_LENGTH).set(waiting as f64);
    gauge!(names::QUEUE_PROCESSING).set(processing as f64);
}

/// Count one routed progress message by outcome.
pub fn record_route_outcome(outcome: RouteOutcome) {
    let outcome = match outcome {
        RouteOutcome::Delivered => "delivered",
        RouteOutcome::NotHere => "not_here",
        RouteOutcome::Dropped => "dropped",
        RouteOutcome::Malformed => "malformed",
    };
    counter!(names::RELAY_MESSAGES_TOTAL, "outcome" => outcome).increment(1);
}

static FILE_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/file/[^/]+$").expect("valid file segment pattern"));

/// Collapse artifact names so each file does not get its own series.
fn sanitize_path(path: &str) -> String {
    FILE_SEGMENT.replace(path, "/file/:file_name").to_string()
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
    record_http_request(&method, &path, status, start.elapsed().as_secs_f64());

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_path() {
        assert_eq!(
            sanitize_path("/api/download/file/export_cursor_csv_abc.csv"),
            "/api/download/file/:file_name"
        );
        assert_eq!(sanitize_path("/api/download/json_lines"), "/api/download/json_lines");
        assert_eq!(sanitize_path("/api/download/queue/status"), "/api/download/queue/status");
    }
}
