//! Job log using Redis Streams.

use std::time::Duration;

use async_trait::async_trait;
use genq_models::Job;
use redis::streams::{StreamId, StreamPendingCountReply, StreamRangeReply, StreamReadReply};
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::entry::{decode_data, encode_fields, EntryId, LogEntry, PendingEntry, FIELD_DATA};
use crate::error::{QueueError, QueueResult};
use crate::queue::{JobQueue, QueueConfig};

/// Page size used when walking the pending list.
const PENDING_PAGE: usize = 100;

/// Redis Streams backed job log.
pub struct RedisJobQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl RedisJobQueue {
    /// Create a new job queue.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    /// Decode a raw stream entry. Entries without a payload count as malformed.
    fn decode_entry(entry: &StreamId) -> QueueResult<LogEntry> {
        let position = EntryId::new(entry.id.clone());
        let data: String = entry
            .get(FIELD_DATA)
            .ok_or_else(|| QueueError::malformed_entry(position.as_str(), "missing data field"))?;
        let job = decode_data(&position, &data)?;
        Ok(LogEntry { position, job })
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn init(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        // Create consumer group (ignore error if already exists)
        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    async fn append(&self, job: &Job) -> QueueResult<EntryId> {
        let mut conn = self.connection().await?;
        let [(id_field, id_value), (data_field, data_value)] = encode_fields(job)?;

        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg(id_field)
            .arg(&id_value)
            .arg(data_field)
            .arg(&data_value)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::enqueue_failed(e.to_string()))?;

        info!("Enqueued job {} with message ID {}", job.id, message_id);
        Ok(EntryId::new(message_id))
    }

    async fn claim(
        &self,
        consumer: &str,
        max_count: usize,
        block: Duration,
    ) -> QueueResult<Vec<LogEntry>> {
        let mut conn = self.connection().await?;

        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg("COUNT")
            .arg(max_count.max(1));
        if !block.is_zero() {
            cmd.arg("BLOCK").arg(block.as_millis() as u64);
        }
        cmd.arg("STREAMS").arg(&self.config.stream_name).arg(">");

        // A blocking read that times out replies nil
        let reply: Option<StreamReadReply> = cmd.query_async(&mut conn).await?;

        let mut entries = Vec::new();
        for stream_key in reply.unwrap_or_default().keys {
            for raw in stream_key.ids {
                match Self::decode_entry(&raw) {
                    Ok(entry) => {
                        debug!("Claimed job {} at {}", entry.job.id, entry.position);
                        entries.push(entry);
                    }
                    Err(e) => {
                        // Nothing can ever run it, so drop it from both the log and the pending list
                        warn!("Discarding malformed entry {}: {}", raw.id, e);
                        self.ack_and_delete(&EntryId::new(raw.id.clone())).await.ok();
                    }
                }
            }
        }

        Ok(entries)
    }

    async fn ack(&self, position: &EntryId) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(position.as_str())
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Acknowledged entry: {}", position);
        Ok(())
    }

    async fn delete(&self, position: &EntryId) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(position.as_str())
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Deleted entry: {}", position);
        Ok(())
    }

    async fn pending(&self) -> QueueResult<Vec<PendingEntry>> {
        let mut conn = self.connection().await?;
        let mut entries = Vec::new();
        let mut start = "-".to_string();

        loop {
            let page: StreamPendingCountReply = redis::cmd("XPENDING")
                .arg(&self.config.stream_name)
                .arg(&self.config.consumer_group)
                .arg(&start)
                .arg("+")
                .arg(PENDING_PAGE)
                .query_async(&mut conn)
                .await?;

            let fetched = page.ids.len();
            for p in page.ids {
                start = format!("({}", p.id);
                entries.push(PendingEntry {
                    position: EntryId::new(p.id),
                    consumer: p.consumer,
                    idle: Duration::from_millis(p.last_delivered_ms as u64),
                    delivery_count: p.times_delivered as u64,
                });
            }

            if fetched < PENDING_PAGE {
                break;
            }
        }

        Ok(entries)
    }

    async fn read(&self, position: &EntryId) -> QueueResult<Option<Job>> {
        let mut conn = self.connection().await?;

        let reply: StreamRangeReply = redis::cmd("XRANGE")
            .arg(&self.config.stream_name)
            .arg(position.as_str())
            .arg(position.as_str())
            .arg("COUNT")
            .arg(1)
            .query_async(&mut conn)
            .await?;

        match reply.ids.first() {
            Some(raw) => Self::decode_entry(raw).map(|entry| Some(entry.job)),
            None => Ok(None),
        }
    }

    async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }

    async fn pending_count(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;

        // Summary form: [count, smallest id, largest id, consumers]
        let summary: redis::Value = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .query_async(&mut conn)
            .await?;

        let count = match summary {
            redis::Value::Array(items) => match items.first() {
                Some(v) => redis::from_redis_value::<u64>(v)?,
                None => 0,
            },
            _ => 0,
        };
        Ok(count)
    }
}
