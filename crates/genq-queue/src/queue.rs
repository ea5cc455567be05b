//! Job log abstraction with consumer-group semantics.

use std::time::Duration;

use async_trait::async_trait;
use genq_models::Job;

use crate::entry::{EntryId, LogEntry, PendingEntry};
use crate::error::QueueResult;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for jobs
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Pub/Sub channel for progress events
    pub progress_channel: String,
    /// Key prefix for the success/failure counters
    pub stats_prefix: String,
    /// How long a claim blocks on an empty log
    pub claim_block: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "genq:jobs".to_string(),
            consumer_group: "genq:workers".to_string(),
            progress_channel: "genq:progress".to_string(),
            stats_prefix: "genq:stats".to_string(),
            claim_block: Duration::from_secs(1),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            stream_name: std::env::var("QUEUE_STREAM")
                .unwrap_or_else(|_| "genq:jobs".to_string()),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or_else(|_| "genq:workers".to_string()),
            progress_channel: std::env::var("PROGRESS_CHANNEL")
                .unwrap_or_else(|_| "genq:progress".to_string()),
            stats_prefix: std::env::var("STATS_PREFIX")
                .unwrap_or_else(|_| "genq:stats".to_string()),
            claim_block: Duration::from_millis(
                std::env::var("QUEUE_CLAIM_BLOCK_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1000),
            ),
        }
    }
}

/// Append-only job log shared by a named consumer group.
///
/// The group is fixed when the queue is constructed; every operation acts on
/// it. Delivery is at-least-once: an entry is handed to one consumer at a
/// time and only handed out again after recovery re-appends it.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Create the consumer group. Idempotent: an existing group is not an error.
    async fn init(&self) -> QueueResult<()>;

    /// Durably record a job and return its log position.
    async fn append(&self, job: &Job) -> QueueResult<EntryId>;

    /// Claim up to `max_count` entries never delivered to any consumer of the
    /// group, blocking up to `block` when none are available.
    async fn claim(
        &self,
        consumer: &str,
        max_count: usize,
        block: Duration,
    ) -> QueueResult<Vec<LogEntry>>;

    /// Remove the pending entry for `position`. The log entry itself stays.
    async fn ack(&self, position: &EntryId) -> QueueResult<()>;

    /// Permanently remove the log entry at `position`.
    async fn delete(&self, position: &EntryId) -> QueueResult<()>;

    /// Every pending entry of the group, across all consumers.
    async fn pending(&self) -> QueueResult<Vec<PendingEntry>>;

    /// Read back the job stored at `position`, if it is still in the log.
    async fn read(&self, position: &EntryId) -> QueueResult<Option<Job>>;

    /// Number of entries currently in the log (waiting and in flight).
    async fn len(&self) -> QueueResult<u64>;

    /// Number of claimed-but-unacknowledged entries.
    async fn pending_count(&self) -> QueueResult<u64>;

    /// Acknowledge then delete: the normal end of an entry's life.
    async fn ack_and_delete(&self, position: &EntryId) -> QueueResult<()> {
        self.ack(position).await?;
        self.delete(position).await
    }
}
