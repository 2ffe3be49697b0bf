use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, mpsc};
use tracing::debug;
use uuid::Uuid;

use kindred_types::events::ServerFrame;

/// What the per-connection send task should do next.
#[derive(Debug)]
pub enum Outbound {
    Frame(ServerFrame),
    /// Close the socket. Sent to a connection that was superseded.
    Close,
}

/// Sending half of one live connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    conn_id: Uuid,
    connected_at: DateTime<Utc>,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ConnectionHandle {
    /// Creates a handle together with the receiver its send task drains.
    pub fn open() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            conn_id: Uuid::new_v4(),
            connected_at: Utc::now(),
            tx,
        };
        (handle, rx)
    }

    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Queues a frame. Returns false if the connection's send task is gone.
    pub fn send(&self, frame: ServerFrame) -> bool {
        self.tx.send(Outbound::Frame(frame)).is_ok()
    }

    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Registry of live connections: at most one per user.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

#[derive(Default)]
struct DispatcherInner {
    /// user_id -> current connection
    connections: RwLock<HashMap<Uuid, ConnectionHandle>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `handle` the user's current connection. Returns the connection it
    /// replaced, which the caller is expected to close.
    pub async fn register(&self, user_id: Uuid, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        self.inner.connections.write().await.insert(user_id, handle)
    }

    /// Removes the user's entry, but only if `conn_id` still owns it. A stale
    /// connection shutting down after a reconnect must not evict the new one.
    pub async fn unregister(&self, user_id: Uuid, conn_id: Uuid) -> bool {
        let mut connections = self.inner.connections.write().await;
        match connections.get(&user_id) {
            Some(current) if current.conn_id == conn_id => {
                connections.remove(&user_id);
                true
            }
            _ => false,
        }
    }

    pub async fn lookup(&self, user_id: Uuid) -> Option<ConnectionHandle> {
        self.inner.connections.read().await.get(&user_id).cloned()
    }

    pub async fn is_current(&self, user_id: Uuid, conn_id: Uuid) -> bool {
        self.inner
            .connections
            .read()
            .await
            .get(&user_id)
            .is_some_and(|h| h.conn_id == conn_id)
    }

    pub async fn is_connected(&self, user_id: Uuid) -> bool {
        self.inner.connections.read().await.contains_key(&user_id)
    }

    /// Sends a frame to the user's current connection. Returns false when the
    /// user is offline or the socket is already closing; the entry itself is
    /// left for the connection's own teardown to remove.
    pub async fn send_to_user(&self, user_id: Uuid, frame: ServerFrame) -> bool {
        let connections = self.inner.connections.read().await;
        let Some(handle) = connections.get(&user_id) else {
            return false;
        };
        if handle.send(frame) {
            true
        } else {
            debug!("Send to {} failed, connection {} is closing", user_id, handle.conn_id);
            false
        }
    }

    pub async fn broadcast_to(&self, user_ids: &[Uuid], frame: ServerFrame) {
        let connections = self.inner.connections.read().await;
        for user_id in user_ids {
            if let Some(handle) = connections.get(user_id) {
                if !handle.send(frame.clone()) {
                    debug!("Broadcast to {} skipped, connection closing", user_id);
                }
            }
        }
    }

    pub async fn broadcast_all(&self, frame: ServerFrame) {
        let connections = self.inner.connections.read().await;
        for (user_id, handle) in connections.iter() {
            if !handle.send(frame.clone()) {
                debug!("Broadcast to {} skipped, connection closing", user_id);
            }
        }
    }

    pub async fn connected_users(&self) -> Vec<Uuid> {
        self.inner.connections.read().await.keys().copied().collect()
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.connections.read().await.len()
    }
}
