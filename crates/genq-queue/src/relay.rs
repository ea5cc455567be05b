//! Routes progress messages to the connection of the client that owns them.
//!
//! Every node publishes to, and subscribes from, the shared broadcast
//! channel. A node only holds connections for its own clients, so each
//! message is delivered by whichever node has the owner connected and is
//! ignored everywhere else.
//!
//! Delivery is best-effort. A connection that cannot take a message is
//! purged. With a [`LocalBroadcaster`](crate::broadcast::LocalBroadcaster)
//! a relay that falls behind by more than the channel capacity loses the
//! oldest messages; `LocalBroadcaster::for_slots` sizes it for a worker.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use genq_models::ProgressEvent;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::broadcast::Broadcaster;
use crate::error::QueueResult;
use crate::progress::decode_message;

/// Delay before re-subscribing after the broadcast stream ends.
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// A live client connection held by this node.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Identifier unique among this node's connections.
    fn id(&self) -> &str;

    /// Write one serialized event. Writes to one connection never interleave.
    /// Must fail rather than wait when the client is not keeping up, since
    /// the relay delivers messages one at a time.
    async fn send(&self, payload: String) -> QueueResult<()>;
}

/// What happened to one routed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Delivered,
    /// Owner not connected to this node
    NotHere,
    /// Send failed; the connection was purged
    Dropped,
    Malformed,
}

/// Owner -> connection map for this node. The latest connection for an
/// owner replaces any earlier one.
#[derive(Default)]
pub struct ConnectionDirectory {
    connections: RwLock<HashMap<String, Arc<dyn Connection>>>,
}

impl ConnectionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connect(&self, owner: impl Into<String>, connection: Arc<dyn Connection>) {
        let owner = owner.into();
        debug!(owner = %owner, connection_id = connection.id(), "Connection registered");
        if let Ok(mut map) = self.connections.write() {
            map.insert(owner, connection);
        }
    }

    /// Remove whichever owner entry still points at `connection_id`.
    pub fn on_disconnect(&self, connection_id: &str) {
        if let Ok(mut map) = self.connections.write() {
            map.retain(|owner, conn| {
                let keep = conn.id() != connection_id;
                if !keep {
                    debug!(owner = %owner, connection_id, "Connection removed");
                }
                keep
            });
        }
    }

    pub fn get(&self, owner: &str) -> Option<Arc<dyn Connection>> {
        self.connections.read().ok()?.get(owner).cloned()
    }

    pub fn len(&self) -> usize {
        self.connections.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Send `payload` to the owner's connection if it is on this node.
    pub async fn deliver(&self, owner: &str, payload: String) -> RouteOutcome {
        let Some(connection) = self.get(owner) else {
            return RouteOutcome::NotHere;
        };

        match connection.send(payload).await {
            Ok(()) => RouteOutcome::Delivered,
            Err(e) => {
                warn!(
                    owner,
                    connection_id = connection.id(),
                    "Progress delivery failed, dropping connection: {}",
                    e
                );
                self.on_disconnect(connection.id());
                RouteOutcome::Dropped
            }
        }
    }
}

type RouteObserver = Arc<dyn Fn(RouteOutcome) + Send + Sync>;

/// Publishes progress to the cluster and delivers what arrives to local clients.
#[derive(Clone)]
pub struct ProgressRelay {
    broadcaster: Arc<dyn Broadcaster>,
    directory: Arc<ConnectionDirectory>,
    observer: Option<RouteObserver>,
}

impl ProgressRelay {
    pub fn new(broadcaster: Arc<dyn Broadcaster>, directory: Arc<ConnectionDirectory>) -> Self {
        Self {
            broadcaster,
            directory,
            observer: None,
        }
    }

    /// Call `observer` with the outcome of every routed message.
    pub fn with_observer(mut self, observer: impl Fn(RouteOutcome) + Send + Sync + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    pub fn broadcaster(&self) -> &Arc<dyn Broadcaster> {
        &self.broadcaster
    }

    pub fn directory(&self) -> &Arc<ConnectionDirectory> {
        &self.directory
    }

    /// Broadcast an event to every node.
    pub async fn publish(&self, owner: &str, event: &ProgressEvent) -> QueueResult<()> {
        self.broadcaster.publish(owner, event).await
    }

    /// Deliver one raw broadcast message to its owner, if connected here.
    pub async fn route(&self, raw: &str) -> RouteOutcome {
        let outcome = match decode_message(raw) {
            Ok((owner, payload)) => self.directory.deliver(owner, payload.to_string()).await,
            Err(e) => {
                warn!("Dropping progress message: {}", e);
                RouteOutcome::Malformed
            }
        };
        if let Some(observer) = &self.observer {
            observer(outcome);
        }
        outcome
    }

    /// Subscribe and route until `shutdown` flips to true. A broken
    /// subscription is re-established.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> QueueResult<()> {
        info!("Progress relay started");

        while !*shutdown.borrow() {
            let mut messages = match self.broadcaster.subscribe().await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Progress subscription failed: {}", e);
                    tokio::select! {
                        _ = tokio::time::sleep(RESUBSCRIBE_DELAY) => continue,
                        _ = shutdown.changed() => break,
                    }
                }
            };

            loop {
                tokio::select! {
                    next = messages.next() => match next {
                        Some(raw) => {
                            self.route(&raw).await;
                        }
                        None => {
                            warn!("Progress subscription ended, resubscribing");
                            break;
                        }
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Progress relay stopped");
                            return Ok(());
                        }
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(RESUBSCRIBE_DELAY) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Progress relay stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::LocalBroadcaster;
    use crate::error::QueueError;
    use crate::progress::encode_message;
    use genq_models::JobId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingConnection {
        id: String,
        sent: Mutex<Vec<String>>,
        fail: bool,
    }

    impl RecordingConnection {
        fn new(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                ..Default::default()
            })
        }

        fn broken(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                fail: true,
                ..Default::default()
            })
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Connection for RecordingConnection {
        fn id(&self) -> &str {
            &self.id
        }

        async fn send(&self, payload: String) -> QueueResult<()> {
            if self.fail {
                return Err(QueueError::send_failed("closed"));
            }
            self.sent.lock().unwrap().push(payload);
            Ok(())
        }
    }

    fn message(owner: &str) -> (String, String) {
        let event = ProgressEvent::started(&JobId::from_string("j1"));
        let raw = encode_message(owner, &event).unwrap();
        let payload = serde_json::to_string(&event).unwrap();
        (raw, payload)
    }

    #[tokio::test]
    async fn delivers_payload_to_owner_only() {
        let directory = Arc::new(ConnectionDirectory::new());
        let alice = RecordingConnection::new("c1");
        let bob = RecordingConnection::new("c2");
        directory.on_connect("alice", alice.clone());
        directory.on_connect("bob", bob.clone());

        let relay = ProgressRelay::new(Arc::new(LocalBroadcaster::default()), directory);
        let (raw, payload) = message("alice");

        assert_eq!(relay.route(&raw).await, RouteOutcome::Delivered);
        assert_eq!(alice.sent(), vec![payload]);
        assert!(bob.sent().is_empty());
    }

    #[tokio::test]
    async fn unknown_owner_and_garbage_are_ignored() {
        let relay = ProgressRelay::new(
            Arc::new(LocalBroadcaster::default()),
            Arc::new(ConnectionDirectory::new()),
        );
        assert_eq!(relay.route(&message("carol").0).await, RouteOutcome::NotHere);
        assert_eq!(relay.route("garbage").await, RouteOutcome::Malformed);
    }

    #[tokio::test]
    async fn failed_send_purges_connection() {
        let directory = Arc::new(ConnectionDirectory::new());
        directory.on_connect("alice", RecordingConnection::broken("c1"));

        let relay = ProgressRelay::new(Arc::new(LocalBroadcaster::default()), directory.clone());
        assert_eq!(relay.route(&message("alice").0).await, RouteOutcome::Dropped);
        assert!(directory.get("alice").is_none());
    }

    #[tokio::test]
    async fn stale_disconnect_keeps_newer_connection() {
        let directory = ConnectionDirectory::new();
        directory.on_connect("alice", RecordingConnection::new("old"));
        directory.on_connect("alice", RecordingConnection::new("new"));
        assert_eq!(directory.len(), 1);

        directory.on_disconnect("old");
        assert_eq!(directory.get("alice").map(|c| c.id().to_string()).as_deref(), Some("new"));

        directory.on_disconnect("new");
        assert!(directory.is_empty());
    }

    #[tokio::test]
    async fn each_node_delivers_only_its_own_clients() {
        let local = Arc::new(LocalBroadcaster::default());
        let broadcaster: Arc<dyn Broadcaster> = local.clone();

        let node_a = Arc::new(ConnectionDirectory::new());
        let node_b = Arc::new(ConnectionDirectory::new());
        let alice = RecordingConnection::new("a1");
        node_a.on_connect("alice", alice.clone());

        let delivered = Arc::new(AtomicUsize::new(0));
        let relay_a = {
            let delivered = delivered.clone();
            ProgressRelay::new(broadcaster.clone(), node_a).with_observer(move |o| {
                if o == RouteOutcome::Delivered {
                    delivered.fetch_add(1, Ordering::SeqCst);
                }
            })
        };
        let relay_b = {
            let delivered = delivered.clone();
            ProgressRelay::new(broadcaster.clone(), node_b).with_observer(move |o| {
                if o == RouteOutcome::Delivered {
                    delivered.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle_a = {
            let rx = shutdown_rx.clone();
            tokio::spawn(async move { relay_a.run(rx).await })
        };
        let handle_b = tokio::spawn({
            let relay_b = relay_b.clone();
            async move { relay_b.run(shutdown_rx).await }
        });

        // Wait until both nodes are subscribed
        for _ in 0..100 {
            if local.subscriber_count() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // Published from node B, owner connected to node A
        let event = ProgressEvent::started(&JobId::from_string("j1"));
        relay_b.publish("alice", &event).await.unwrap();

        for _ in 0..100 {
            if !alice.sent().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        shutdown_tx.send(true).unwrap();
        handle_a.await.unwrap().unwrap();
        handle_b.await.unwrap().unwrap();

        assert_eq!(alice.sent().len(), 1);
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }
}
