//! Prometheus metrics for the worker.

use std::net::SocketAddr;
use std::time::Duration;

use genq_models::JobKind;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{WorkerError, WorkerResult};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_CLAIMED_TOTAL: &str = "genq_jobs_claimed_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "genq_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "genq_jobs_failed_total";
    pub const JOBS_RECOVERED_TOTAL: &str = "genq_jobs_recovered_total";
    pub const JOBS_IN_FLIGHT: &str = "genq_jobs_in_flight";
    pub const JOB_DURATION_SECONDS: &str = "genq_job_duration_seconds";
}

/// Install the Prometheus recorder with its own scrape listener.
pub fn init_metrics(port: u16) -> WorkerResult<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics exporter: {}", e)))
}

pub fn record_job_claimed(kind: JobKind) {
    counter!(names::JOBS_CLAIMED_TOTAL, "kind" => kind.as_str()).increment(1);
}

pub fn record_job_completed(kind: JobKind, elapsed: Duration) {
    counter!(names::JOBS_COMPLETED_TOTAL, "kind" => kind.as_str()).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "kind" => kind.as_str(), "outcome" => "completed")
        .record(elapsed.as_secs_f64());
}

pub fn record_job_failed(kind: JobKind, elapsed: Duration) {
    counter!(names::JOBS_FAILED_TOTAL, "kind" => kind.as_str()).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "kind" => kind.as_str(), "outcome" => "failed")
        .record(elapsed.as_secs_f64());
}

pub fn record_jobs_recovered(count: usize) {
    counter!(names::JOBS_RECOVERED_TOTAL).increment(count as u64);
}

pub fn set_jobs_in_flight(count: usize) {
    gauge!(names::JOBS_IN_FLIGHT).set(count as f64);
}
