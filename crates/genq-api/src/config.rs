//! API configuration.

use std::path::PathBuf;
use std::str::FromStr;

/// Where the job log, counters and broadcast channel live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueBackend {
    /// Shared Redis; workers run as separate processes
    Redis,
    /// In-process; the API also runs the dispatcher
    Memory,
}

impl FromStr for QueueBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "redis" => Ok(QueueBackend::Redis),
            "memory" | "in-memory" | "local" => Ok(QueueBackend::Memory),
            other => Err(format!("unknown queue backend: {}", other)),
        }
    }
}

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Max request body size
    pub max_body_size: usize,
    /// Environment (development/production)
    pub environment: String,
    pub queue_backend: QueueBackend,
    /// Token required by the stats reset endpoint. Reset is disabled when unset.
    pub admin_token: Option<String>,
    pub metrics_enabled: bool,
    /// Directory finished artifacts are served from
    pub output_dir: PathBuf,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            max_body_size: 64 * 1024,
            environment: "development".to_string(),
            queue_backend: QueueBackend::Redis,
            admin_token: None,
            metrics_enabled: true,
            output_dir: PathBuf::from("downloads"),
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: std::env::var("API_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),
            max_body_size: std::env::var("MAX_BODY_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_body_size),
            environment: std::env::var("ENVIRONMENT").unwrap_or(defaults.environment),
            queue_backend: std::env::var("QUEUE_BACKEND")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.queue_backend),
            admin_token: std::env::var("ADMIN_TOKEN")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            metrics_enabled: std::env::var("METRICS_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.metrics_enabled),
            output_dir: std::env::var("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
        }
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "production"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_queue_backend() {
        assert_eq!("redis".parse::<QueueBackend>().unwrap(), QueueBackend::Redis);
        assert_eq!(" Memory ".parse::<QueueBackend>().unwrap(), QueueBackend::Memory);
        assert!("kafka".parse::<QueueBackend>().is_err());
    }

    #[test]
    fn reset_is_disabled_by_default() {
        let config = ApiConfig::default();
        assert!(config.admin_token.is_none());
        assert!(!config.is_production());
    }
}
