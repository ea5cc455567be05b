//! Application state.

use std::sync::Arc;

use genq_queue::{
    AtomicStats, Broadcaster, ConnectionDirectory, InMemoryJobQueue, JobQueue, LocalBroadcaster,
    ProgressRelay, QueueConfig, RedisBroadcaster, RedisJobQueue, RedisStats, StatsStore,
};

use crate::config::ApiConfig;
use crate::error::ApiResult;
use crate::metrics;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub queue: Arc<dyn JobQueue>,
    pub stats: Arc<dyn StatsStore>,
    pub relay: ProgressRelay,
    /// Worker slot count reported by the status endpoint
    pub max_concurrent: usize,
    /// Present in Redis mode; used by the readiness probe
    pub redis: Option<redis::Client>,
}

impl AppState {
    /// Assemble state from already built parts.
    pub fn new(
        config: ApiConfig,
        queue: Arc<dyn JobQueue>,
        stats: Arc<dyn StatsStore>,
        broadcaster: Arc<dyn Broadcaster>,
        max_concurrent: usize,
    ) -> Self {
        let relay = ProgressRelay::new(broadcaster, Arc::new(ConnectionDirectory::new()))
            .with_observer(metrics::record_route_outcome);
        Self {
            config,
            queue,
            stats,
            relay,
            max_concurrent,
            redis: None,
        }
    }

    /// State backed by the shared Redis instance.
    pub fn redis(
        config: ApiConfig,
        queue_config: &QueueConfig,
        max_concurrent: usize,
    ) -> ApiResult<Self> {
        let queue = RedisJobQueue::new(queue_config.clone())?;
        let stats = RedisStats::new(&queue_config.redis_url, &queue_config.stats_prefix)?;
        let broadcaster =
            RedisBroadcaster::new(&queue_config.redis_url, &queue_config.progress_channel)?;
        let client = redis::Client::open(queue_config.redis_url.as_str())
            .map_err(genq_queue::QueueError::from)?;

        let mut state = Self::new(
            config,
            Arc::new(queue),
            Arc::new(stats),
            Arc::new(broadcaster),
            max_concurrent,
        );
        state.redis = Some(client);
        Ok(state)
    }

    /// State for a single process holding the log, counters and broadcast in memory.
    pub fn in_memory(config: ApiConfig, max_concurrent: usize) -> Self {
        Self::new(
            config,
            Arc::new(InMemoryJobQueue::new()),
            Arc::new(AtomicStats::new()),
            Arc::new(LocalBroadcaster::for_slots(max_concurrent)),
            max_concurrent,
        )
    }

    pub fn directory(&self) -> &Arc<ConnectionDirectory> {
        self.relay.directory()
    }
}
