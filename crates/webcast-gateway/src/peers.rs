//! Registry of connected signaling clients and their outboxes.
//!
//! Sending never waits on a peer: messages are queued with `try_send` and a
//! per-connection writer task moves them onto the socket.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, trace};
use uuid::Uuid;
use webcast_common::{ServerMessage, SignalError};

/// Capacity of each connection's outbound queue.
pub const OUTBOX_CAPACITY: usize = 128;

/// Identity of one transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Clone, Default)]
pub struct Peers {
    outboxes: Arc<RwLock<HashMap<ConnectionId, mpsc::Sender<ServerMessage>>>>,
}

impl Peers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and hand back the receiving half of its outbox.
    pub async fn register(&self, id: ConnectionId) -> mpsc::Receiver<ServerMessage> {
        let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
        self.outboxes.write().await.insert(id, tx);
        rx
    }

    pub async fn unregister(&self, id: ConnectionId) {
        self.outboxes.write().await.remove(&id);
    }

    pub async fn len(&self) -> usize {
        self.outboxes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.outboxes.read().await.is_empty()
    }

    /// Queue `msg` for `id` without waiting.
    pub async fn send(&self, id: ConnectionId, msg: ServerMessage) -> Result<(), SignalError> {
        let tx = {
            let guard = self.outboxes.read().await;
            guard.get(&id).cloned()
        };
        let Some(tx) = tx else {
            return Err(SignalError::send(format!("connection {id} is gone")));
        };
        tx.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                SignalError::send(format!("outbox of {id} is full"))
            }
            mpsc::error::TrySendError::Closed(_) => {
                SignalError::send(format!("connection {id} is closed"))
            }
        })
    }

    /// Fire-and-forget variant of [`Peers::send`]: failures are only logged.
    pub async fn deliver(&self, id: ConnectionId, msg: ServerMessage) {
        match self.send(id, msg).await {
            Ok(()) => trace!(connection = %id, "queued outbound message"),
            Err(err) => debug!(connection = %id, "dropping outbound message: {}", err),
        }
    }
}
