//! File generation worker.
//!
//! This crate provides:
//! - The dispatcher: claims jobs up to a concurrency cap and runs them
//! - Job handlers for each artifact kind, selected through a registry
//! - The record source handlers read from
//! - Retention of generated artifacts

pub mod cleanup;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod metrics;
pub mod processing;
pub mod records;

pub use config::WorkerConfig;
pub use context::JobContext;
pub use dispatcher::Dispatcher;
pub use error::{WorkerError, WorkerResult};
pub use handlers::{HandlerRegistry, JobHandler};
pub use logging::JobLogger;
pub use processing::ProcessingSet;
pub use records::{Record, RecordSource, SyntheticRecordSource};
