//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Default parallel job slots: half the available cores, at least two.
pub fn default_max_concurrent_jobs() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2);
    (cores / 2).max(2)
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent jobs per process
    pub max_concurrent_jobs: usize,
    /// Directory finished artifacts are written to
    pub output_dir: PathBuf,
    /// Back-off after a failed claim
    pub tick_interval: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Artifacts older than this are swept
    pub output_retention: Duration,
    /// How often the sweeper runs
    pub cleanup_interval: Duration,
    /// Rows served by the synthetic record source
    pub synthetic_rows: u64,
    /// Records fetched per page
    pub chunk_size: usize,
    /// Records between progress events
    pub progress_every: u64,
    /// Port for the Prometheus scrape endpoint; disabled when unset
    pub metrics_port: Option<u16>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            output_dir: PathBuf::from("downloads"),
            tick_interval: Duration::from_millis(1000),
            shutdown_timeout: Duration::from_secs(60),
            output_retention: Duration::from_secs(3600),
            cleanup_interval: Duration::from_secs(3600),
            synthetic_rows: 100_000,
            chunk_size: 1000,
            progress_every: 5000,
            metrics_port: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_jobs: std::env::var("WORKER_MAX_JOBS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.max_concurrent_jobs),
            output_dir: std::env::var("WORKER_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            tick_interval: Duration::from_millis(
                std::env::var("WORKER_TICK_INTERVAL_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1000),
            ),
            shutdown_timeout: Duration::from_secs(
                std::env::var("WORKER_SHUTDOWN_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
            output_retention: Duration::from_secs(
                std::env::var("WORKER_OUTPUT_RETENTION_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3600),
            ),
            cleanup_interval: Duration::from_secs(
                std::env::var("WORKER_CLEANUP_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3600),
            ),
            synthetic_rows: std::env::var("WORKER_SYNTHETIC_ROWS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.synthetic_rows),
            chunk_size: std::env::var("WORKER_CHUNK_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(1000),
            progress_every: std::env::var("WORKER_PROGRESS_EVERY")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &u64| *n > 0)
                .unwrap_or(5000),
            metrics_port: std::env::var("WORKER_METRICS_PORT")
                .ok()
                .and_then(|s| s.parse().ok()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_slots_never_below_two() {
        assert!(default_max_concurrent_jobs() >= 2);
        assert!(WorkerConfig::default().max_concurrent_jobs >= 2);
    }
}
