//! Shared data models for the genq file-generation queue.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs and job kinds
//! - Progress events relayed to connected clients
//! - Queue status snapshots

pub mod job;
pub mod progress;
pub mod status;

// Re-export common types
pub use job::{Job, JobId, JobKind, ParseJobKindError};
pub use progress::{ProgressEvent, ProgressState};
pub use status::QueueStatus;
