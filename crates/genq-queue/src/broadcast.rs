//! Cluster-wide broadcast channel for progress messages.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use genq_models::ProgressEvent;
use redis::AsyncCommands;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::{QueueError, QueueResult};
use crate::progress::encode_message;

/// Raw `"<owner>:<json>"` messages as received from the channel.
pub type MessageStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// Delivers every published message to every subscribed process.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Publish an already encoded message.
    async fn publish_raw(&self, message: String) -> QueueResult<()>;

    /// Subscribe to all messages published from now on.
    async fn subscribe(&self) -> QueueResult<MessageStream>;

    async fn publish(&self, owner: &str, event: &ProgressEvent) -> QueueResult<()> {
        self.publish_raw(encode_message(owner, event)?).await
    }
}

const DEFAULT_CAPACITY: usize = 1024;
const MESSAGES_PER_SLOT: usize = 256;

/// In-process broadcaster. Every subscriber in this process sees every message.
#[derive(Debug, Clone)]
pub struct LocalBroadcaster {
    sender: broadcast::Sender<String>,
}

impl LocalBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Capacity for a process running `slots` jobs at once, with room for
    /// every running job's progress backlog.
    pub fn for_slots(slots: usize) -> Self {
        Self::new((slots * MESSAGES_PER_SLOT).max(DEFAULT_CAPACITY))
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for LocalBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl Broadcaster for LocalBroadcaster {
    async fn publish_raw(&self, message: String) -> QueueResult<()> {
        // No subscribers is not an error: nobody is listening yet
        if self.sender.send(message).is_err() {
            debug!("Progress message dropped: no subscribers");
        }
        Ok(())
    }

    async fn subscribe(&self) -> QueueResult<MessageStream> {
        let receiver = self.sender.subscribe();
        let stream = futures_util::stream::unfold(receiver, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(message) => return Some((message, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Progress subscriber lagged, {} messages skipped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(Box::pin(stream))
    }
}

/// Redis Pub/Sub broadcaster on a single channel.
pub struct RedisBroadcaster {
    client: redis::Client,
    channel: String,
}

impl RedisBroadcaster {
    pub fn new(redis_url: &str, channel: impl Into<String>) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            channel: channel.into(),
        })
    }
}

#[async_trait]
impl Broadcaster for RedisBroadcaster {
    async fn publish_raw(&self, message: String) -> QueueResult<()> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;

        debug!("Publishing progress message to {}", self.channel);
        conn.publish::<_, _, ()>(&self.channel, message).await?;
        Ok(())
    }

    async fn subscribe(&self) -> QueueResult<MessageStream> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;
        pubsub.subscribe(&self.channel).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            match msg.get_payload::<String>() {
                Ok(payload) => Some(payload),
                Err(e) => {
                    warn!("Dropping non-text progress message: {}", e);
                    None
                }
            }
        });

        Ok(Box::pin(stream))
    }
}
