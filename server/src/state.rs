//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It
//! holds the module registry (read-only after startup) and the set of live
//! connections, keyed by an opaque connection id issued at accept time. Each
//! connection is reachable only through its outbound channel; the socket
//! itself is owned by the connection task.

use std::collections::HashMap;
use std::sync::Arc;

use frames::{Message, now_ms};
use tokio::sync::{RwLock, mpsc};
use tracing::debug;
use uuid::Uuid;

use crate::registry::ModuleRegistry;

/// Opaque identity of one accepted connection.
pub type ConnectionId = Uuid;

/// Shared application state. Clone is required by Axum; all fields are
/// `Arc`-wrapped or `Copy`.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ModuleRegistry>,
    pub connections: Arc<RwLock<HashMap<ConnectionId, mpsc::Sender<Message>>>>,
    outbound_capacity: usize,
}

impl AppState {
    #[must_use]
    pub fn new(registry: ModuleRegistry, outbound_capacity: usize) -> Self {
        Self {
            registry: Arc::new(registry),
            connections: Arc::new(RwLock::new(HashMap::new())),
            outbound_capacity: outbound_capacity.max(1),
        }
    }

    /// Register a new connection and return the receiver its socket writer
    /// drains.
    pub async fn attach(&self, id: ConnectionId) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(self.outbound_capacity);
        self.connections.write().await.insert(id, tx);
        rx
    }

    /// Forget a connection. Messages still queued for it are discarded.
    pub async fn detach(&self, id: ConnectionId) {
        self.connections.write().await.remove(&id);
    }

    /// Stamp and queue a message for a connection.
    ///
    /// Returns `false` when the connection is gone; the message is dropped,
    /// never queued or retried.
    pub async fn send_to(&self, id: ConnectionId, message: Message) -> bool {
        let tx = self.connections.read().await.get(&id).cloned();
        let Some(tx) = tx else {
            debug!(client_id = %id, msg_id = %message.id, "state: dropping message for closed connection");
            return false;
        };
        tx.send(message.with_ts(now_ms())).await.is_ok()
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
