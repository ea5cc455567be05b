//! Progress WebSocket: the connection layer feeding the relay.
//!
//! Every socket gets a bounded channel drained by a single writer task, so
//! relay deliveries and heartbeats never interleave on the wire.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use genq_queue::{Connection, QueueError, QueueResult};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::interval;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ApiError;
use crate::metrics;
use crate::security::is_valid_owner;
use crate::state::AppState;

/// Global counter for active WebSocket connections.
static ACTIVE_WS_CONNECTIONS: AtomicI64 = AtomicI64::new(0);

const WS_SEND_BUFFER_SIZE: usize = 32;
const WS_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressParams {
    pub user_id: Option<String>,
}

/// A client socket as seen by the connection directory.
pub struct WsConnection {
    id: String,
    tx: mpsc::Sender<Message>,
}

impl WsConnection {
    pub fn new(tx: mpsc::Sender<Message>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tx,
        }
    }
}

#[async_trait]
impl Connection for WsConnection {
    fn id(&self) -> &str {
        &self.id
    }

    /// Never waits on the writer: a client that stops reading fills its
    /// buffer and is dropped instead of stalling the relay.
    async fn send(&self, payload: String) -> QueueResult<()> {
        self.tx
            .try_send(Message::Text(payload))
            .map_err(|e| match e {
                TrySendError::Full(_) => QueueError::send_failed("websocket send buffer full"),
                TrySendError::Closed(_) => QueueError::send_failed("websocket closed"),
            })
    }
}

/// GET /ws/progress?userId=<owner>
pub async fn ws_progress(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<ProgressParams>,
) -> Response {
    let owner = match params.user_id {
        Some(owner) if is_valid_owner(&owner) => owner,
        _ => return ApiError::bad_request("userId is required").into_response(),
    };

    ws.on_upgrade(move |socket| async move {
        metrics::record_ws_connection();
        let count = ACTIVE_WS_CONNECTIONS.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_ws_active_connections(count);

        handle_progress_socket(socket, state, owner).await;
        let count = ACTIVE_WS_CONNECTIONS.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_ws_active_connections(count);
    })
}

async fn handle_progress_socket(socket: WebSocket, state: AppState, owner: String) {
    let (mut ws_sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(WS_SEND_BUFFER_SIZE);

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    let connection = Arc::new(WsConnection::new(tx.clone()));
    let connection_id = connection.id.clone();
    state.directory().on_connect(owner.clone(), connection);
    info!(owner = %owner, connection_id = %connection_id, "Progress socket connected");

    let mut heartbeat = interval(WS_HEARTBEAT_INTERVAL);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            msg = receiver.next() => match msg {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(owner = %owner, "Progress socket error: {}", e);
                    break;
                }
                // Clients only listen; anything else they send is ignored
                Some(Ok(_)) => {}
            },
            _ = heartbeat.tick() => {
                if tx.try_send(Message::Ping(Vec::new())).is_err() && tx.is_closed() {
                    break;
                }
            }
        }
    }

    state.directory().on_disconnect(&connection_id);
    drop(tx);
    send_task.abort();
    info!(owner = %owner, connection_id = %connection_id, "Progress socket closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use genq_models::{JobId, ProgressEvent};
    use genq_queue::{encode_message, ConnectionDirectory, LocalBroadcaster, ProgressRelay, RouteOutcome};

    #[tokio::test]
    async fn connection_forwards_payload_to_writer() {
        let (tx, mut rx) = mpsc::channel(4);
        let connection = WsConnection::new(tx);

        connection.send("{\"state\":\"queued\"}".to_string()).await.unwrap();
        match rx.recv().await {
            Some(Message::Text(text)) => assert_eq!(text, "{\"state\":\"queued\"}"),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn send_fails_once_writer_is_gone() {
        let (tx, rx) = mpsc::channel(4);
        let connection = WsConnection::new(tx);
        drop(rx);

        assert!(connection.send("x".to_string()).await.is_err());
    }

    #[tokio::test]
    async fn stalled_client_is_dropped_without_blocking_others() {
        let (stalled_tx, _stalled_rx) = mpsc::channel(WS_SEND_BUFFER_SIZE);
        let (healthy_tx, mut healthy_rx) = mpsc::channel(WS_SEND_BUFFER_SIZE);
        let directory = Arc::new(ConnectionDirectory::new());
        directory.on_connect("slow", Arc::new(WsConnection::new(stalled_tx)));
        directory.on_connect("fast", Arc::new(WsConnection::new(healthy_tx)));
        let relay = ProgressRelay::new(Arc::new(LocalBroadcaster::default()), directory.clone());

        let event = ProgressEvent::started(&JobId::from_string("j1"));
        let to_slow = encode_message("slow", &event).unwrap();
        for _ in 0..WS_SEND_BUFFER_SIZE {
            assert_eq!(relay.route(&to_slow).await, RouteOutcome::Delivered);
        }

        let overflow = tokio::time::timeout(Duration::from_secs(1), relay.route(&to_slow))
            .await
            .unwrap();
        assert_eq!(overflow, RouteOutcome::Dropped);
        assert!(directory.get("slow").is_none());

        let to_fast = encode_message("fast", &event).unwrap();
        let delivered = tokio::time::timeout(Duration::from_secs(1), relay.route(&to_fast))
            .await
            .unwrap();
        assert_eq!(delivered, RouteOutcome::Delivered);
        assert!(matches!(healthy_rx.recv().await, Some(Message::Text(_))));
    }

    #[test]
    fn connection_ids_are_unique() {
        let (tx, _rx) = mpsc::channel(1);
        assert_ne!(WsConnection::new(tx.clone()).id(), WsConnection::new(tx).id());
    }
}
