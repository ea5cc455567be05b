//! Axum HTTP/WebSocket API server for the genq file-generation queue.
//!
//! This crate provides:
//! - Download request, queue status and stats reset endpoints
//! - Artifact file serving
//! - The progress WebSocket feeding the relay's connection directory
//! - Health/readiness probes and Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod security;
pub mod state;
pub mod ws;

pub use config::{ApiConfig, QueueBackend};
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
