//! Success/failure counters.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::info;

use crate::error::{QueueError, QueueResult};

/// Point-in-time read of both counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub success: u64,
    pub failure: u64,
}

impl StatsSnapshot {
    pub fn total(&self) -> u64 {
        self.success + self.failure
    }

    /// Percentage of completed jobs that succeeded; 0 when nothing completed.
    pub fn success_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.success as f64 / total as f64 * 100.0
    }
}

/// Monotonic counters shared by every worker process.
#[async_trait]
pub trait StatsStore: Send + Sync {
    async fn record_success(&self) -> QueueResult<()>;

    async fn record_failure(&self) -> QueueResult<()>;

    async fn success_count(&self) -> QueueResult<u64>;

    async fn failure_count(&self) -> QueueResult<u64>;

    /// Clear both counters. Administrative only.
    async fn reset(&self) -> QueueResult<()>;

    async fn snapshot(&self) -> QueueResult<StatsSnapshot> {
        Ok(StatsSnapshot {
            success: self.success_count().await?,
            failure: self.failure_count().await?,
        })
    }
}

/// Counters held in this process.
#[derive(Debug, Default)]
pub struct AtomicStats {
    success: AtomicU64,
    failure: AtomicU64,
}

impl AtomicStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read both counters without going through the async trait.
    pub fn load(&self) -> StatsSnapshot {
        StatsSnapshot {
            success: self.success.load(Ordering::Relaxed),
            failure: self.failure.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl StatsStore for AtomicStats {
    async fn record_success(&self) -> QueueResult<()> {
        self.success.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn record_failure(&self) -> QueueResult<()> {
        self.failure.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn success_count(&self) -> QueueResult<u64> {
        Ok(self.success.load(Ordering::Relaxed))
    }

    async fn failure_count(&self) -> QueueResult<u64> {
        Ok(self.failure.load(Ordering::Relaxed))
    }

    async fn reset(&self) -> QueueResult<()> {
        self.success.store(0, Ordering::Relaxed);
        self.failure.store(0, Ordering::Relaxed);
        Ok(())
    }
}

/// Counters in Redis, shared across processes.
pub struct RedisStats {
    client: redis::Client,
    success_key: String,
    failure_key: String,
}

impl RedisStats {
    pub fn new(redis_url: &str, prefix: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            success_key: format!("{}:success", prefix),
            failure_key: format!("{}:failed", prefix),
        })
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    async fn get(&self, key: &str) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let value: Option<u64> = conn.get(key).await?;
        Ok(value.unwrap_or(0))
    }
}

#[async_trait]
impl StatsStore for RedisStats {
    async fn record_success(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        conn.incr::<_, _, ()>(&self.success_key, 1).await?;
        Ok(())
    }

    async fn record_failure(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        conn.incr::<_, _, ()>(&self.failure_key, 1).await?;
        Ok(())
    }

    async fn success_count(&self) -> QueueResult<u64> {
        self.get(&self.success_key).await
    }

    async fn failure_count(&self) -> QueueResult<u64> {
        self.get(&self.failure_key).await
    }

    async fn reset(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(vec![self.success_key.as_str(), self.failure_key.as_str()])
            .await?;
        info!("Reset success/failure counters");
        Ok(())
    }
}
