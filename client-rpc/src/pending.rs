use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;

/// Calls waiting for their response, keyed by request id.
///
/// When a response arrives its entry is removed before the payload is
/// delivered, so a duplicate response finds nothing and is dropped.
#[derive(Default)]
pub(crate) struct PendingCalls {
    calls: HashMap<String, oneshot::Sender<Value>>,
}

impl PendingCalls {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a call. The receiver resolves with the response payload.
    pub(crate) fn register(&mut self, id: String) -> oneshot::Receiver<Value> {
        let (tx, rx) = oneshot::channel();
        self.calls.insert(id, tx);
        rx
    }

    /// Deliver a response payload. Returns `false` when no call is waiting on
    /// `id`.
    pub(crate) fn complete(&mut self, id: &str, payload: Value) -> bool {
        let Some(tx) = self.calls.remove(id) else {
            return false;
        };
        // Receiver may be gone if the caller stopped waiting.
        let _ = tx.send(payload);
        true
    }

    /// Forget a call without resolving it.
    pub(crate) fn remove(&mut self, id: &str) -> bool {
        self.calls.remove(id).is_some()
    }

    /// Drop every waiting call. Their receivers resolve with a closed error.
    pub(crate) fn clear(&mut self) {
        self.calls.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.calls.len()
    }
}

#[cfg(test)]
#[path = "pending_test.rs"]
mod tests;
