//! Job log, consumer group and progress relay for genq.
//!
//! This crate provides:
//! - An append-only job log with consumer-group claim/ack semantics
//!   (Redis Streams, with an in-memory fallback for single-process use)
//! - Crash recovery of orphaned pending entries
//! - Success/failure counters
//! - Cross-node progress fan-out via Redis Pub/Sub

pub mod broadcast;
pub mod consumer;
pub mod entry;
pub mod error;
pub mod memory;
pub mod progress;
pub mod queue;
pub mod recovery;
pub mod redis_queue;
pub mod relay;
pub mod stats;

pub use broadcast::{Broadcaster, LocalBroadcaster, MessageStream, RedisBroadcaster};
pub use consumer::ConsumerIdentity;
pub use entry::{EntryId, LogEntry, PendingEntry};
pub use error::{QueueError, QueueResult};
pub use memory::InMemoryJobQueue;
pub use progress::{decode_message, encode_message, ProgressReporter};
pub use queue::{JobQueue, QueueConfig};
pub use recovery::{recover_pending, RecoveryReport};
pub use redis_queue::RedisJobQueue;
pub use relay::{Connection, ConnectionDirectory, ProgressRelay, RouteOutcome};
pub use stats::{AtomicStats, RedisStats, StatsSnapshot, StatsStore};
