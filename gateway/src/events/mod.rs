//! Event hub: WebSocket fan-out of session status and log lines.
//!
//! Clients connect to `/ws`, subscribe to session ids, and receive JSON
//! frames pushed by the session manager. Delivery is best-effort by design:
//! a consumer that cannot keep up loses frames rather than backing up the
//! broadcaster, and closed sockets are garbage-collected on the next send.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use shared_types::{HubEvent, HubRequest};
use tokio::sync::mpsc;
use tracing::debug;

use crate::AppState;

/// Frames buffered per connection before the consumer counts as slow.
const SUBSCRIBER_BUFFER: usize = 64;

type ConnId = u64;

pub struct EventHub {
    /// session id → connection id → sender
    topics: DashMap<String, HashMap<ConnId, mpsc::Sender<HubEvent>>>,
    next_conn_id: AtomicU64,
}

impl EventHub {
    pub fn new() -> Self {
        Self {
            topics: DashMap::new(),
            next_conn_id: AtomicU64::new(1),
        }
    }

    fn register_conn(&self) -> ConnId {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn subscribe(&self, session_id: &str, conn_id: ConnId, tx: mpsc::Sender<HubEvent>) {
        self.topics
            .entry(session_id.to_string())
            .or_default()
            .insert(conn_id, tx);
    }

    pub fn unsubscribe(&self, session_id: &str, conn_id: ConnId) {
        if let Some(mut subscribers) = self.topics.get_mut(session_id) {
            subscribers.remove(&conn_id);
        }
        self.topics.remove_if(session_id, |_, subs| subs.is_empty());
    }

    /// Remove a connection from every subscriber set (socket closed).
    pub fn drop_conn(&self, conn_id: ConnId) {
        for mut entry in self.topics.iter_mut() {
            entry.value_mut().remove(&conn_id);
        }
        self.topics.retain(|_, subs| !subs.is_empty());
    }

    /// Fan an event out to every subscriber of `session_id`. Sends never
    /// block: full buffers drop the frame, closed channels evict the
    /// subscriber.
    pub fn broadcast(&self, session_id: &str, event: HubEvent) {
        // Snapshot the senders so no shard lock is held during channel I/O.
        let subscribers: Vec<(ConnId, mpsc::Sender<HubEvent>)> = match self.topics.get(session_id)
        {
            Some(entry) => entry.iter().map(|(id, tx)| (*id, tx.clone())).collect(),
            None => return,
        };

        let mut closed: Vec<ConnId> = Vec::new();
        for (conn_id, tx) in subscribers {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!(session_id, conn_id, "slow hub subscriber, frame dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(conn_id),
            }
        }
        if !closed.is_empty() {
            if let Some(mut entry) = self.topics.get_mut(session_id) {
                for conn_id in closed {
                    entry.remove(&conn_id);
                }
            }
        }
    }

    pub fn subscriber_count(&self, session_id: &str) -> usize {
        self.topics
            .get(session_id)
            .map(|entry| entry.len())
            .unwrap_or(0)
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

/// GET /ws: upgrade and serve one hub connection. `?sessionId=` subscribes
/// immediately, before the first client frame.
pub async fn ws_endpoint(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let initial = params.get("sessionId").cloned();
    ws.on_upgrade(move |socket| serve_conn(state, socket, initial))
}

async fn serve_conn(state: Arc<AppState>, socket: WebSocket, initial: Option<String>) {
    let hub = Arc::clone(&state.hub);
    let conn_id = hub.register_conn();
    let (tx, mut rx) = mpsc::channel::<HubEvent>(SUBSCRIBER_BUFFER);

    if let Some(session_id) = initial {
        hub.subscribe(&session_id, conn_id, tx.clone());
    }

    let (mut sink, mut stream) = socket.split();

    // Writer: drain the per-connection buffer onto the socket.
    let writer = async {
        while let Some(event) = rx.recv().await {
            let payload = match serde_json::to_string(&event) {
                Ok(p) => p,
                Err(e) => {
                    debug!("hub frame serialization failed: {e}");
                    continue;
                }
            };
            if sink.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    };

    // Reader: handle subscribe/unsubscribe/ping frames until close.
    let reader = async {
        while let Some(message) = stream.next().await {
            let text = match message {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => continue,
            };
            match serde_json::from_str::<HubRequest>(&text) {
                Ok(HubRequest::Subscribe { session_id }) => {
                    hub.subscribe(&session_id, conn_id, tx.clone());
                }
                Ok(HubRequest::Unsubscribe { session_id }) => {
                    hub.unsubscribe(&session_id, conn_id);
                }
                Ok(HubRequest::Ping) => {
                    // Direct reply through the same buffered channel.
                    let _ = tx.try_send(HubEvent::Pong);
                }
                Err(e) => debug!(conn_id, "unparseable hub frame: {e}"),
            }
        }
    };

    tokio::select! {
        _ = writer => {},
        _ = reader => {},
    }

    hub.drop_conn(conn_id);
    debug!(conn_id, "hub connection closed");
}
