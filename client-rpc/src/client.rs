//! Broker client — link supervisor, pending calls, proxy cache.
//!
//! LIFECYCLE
//! =========
//! `connect(url)` spawns a supervisor task. It loops forever:
//! `Connecting` → handshake → `Open` → session runs → `Closed` → sleep for
//! the next reconnect delay → `Connecting` again. There is no give-up state.
//! `shutdown()` or dropping every handle aborts the supervisor.
//!
//! The supervisor holds only a weak reference to the client, so an idle
//! reconnect loop never keeps a dropped client alive.
//!
//! Every `connect` and `shutdown` starts a new generation. A supervisor
//! publishes link and state changes only while its generation is current, so
//! a task caught mid-transition by `shutdown` cannot reopen the link.
//!
//! CORRELATION
//! ===========
//! A call registers its id in the pending table before the request is queued.
//! Responses resolve the matching entry by `requestId`; unmatched responses
//! are dropped. Pending calls survive a link drop and can still be answered
//! if the same request ids come back, but a reconnect does not resend them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use frames::{Kind, Message};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::endpoint::Endpoint;
use crate::pending::PendingCalls;
use crate::proxy::ModuleProxy;
use crate::{ClientConfig, ClientError};

const EVENT_CAPACITY: usize = 64;

/// Client link state as seen by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Open,
    Closed,
}

pub(crate) fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Handle to a broker connection.
///
/// Cheap to clone; every clone shares the same link, pending table and proxy
/// cache.
#[derive(Clone)]
pub struct BrokerClient {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    config: ClientConfig,
    link: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    pending: Mutex<PendingCalls>,
    proxies: Mutex<HashMap<String, ModuleProxy>>,
    modules: watch::Sender<Vec<String>>,
    state: watch::Sender<LinkState>,
    events: broadcast::Sender<Message>,
    attempts: AtomicU64,
    /// Bumped by `connect` and `shutdown`. A supervisor only publishes state
    /// while its generation is current.
    generation: AtomicU64,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = lock_ignore_poison(&self.supervisor).take() {
            handle.abort();
        }
    }
}

impl Default for BrokerClient {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl BrokerClient {
    /// Create an unconnected client. Nothing happens until [`connect`](Self::connect).
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                config,
                link: Mutex::new(None),
                pending: Mutex::new(PendingCalls::new()),
                proxies: Mutex::new(HashMap::new()),
                modules: watch::Sender::new(Vec::new()),
                state: watch::Sender::new(LinkState::Closed),
                events,
                attempts: AtomicU64::new(0),
                generation: AtomicU64::new(0),
                supervisor: Mutex::new(None),
            }),
        }
    }

    /// Create a client and start connecting to `config.url`.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(config: ClientConfig) -> Self {
        let url = config.url.clone();
        let client = Self::new(config);
        client.connect(url);
        client
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Start (or restart) the link supervisor against `url`.
    ///
    /// Returns immediately; use [`wait_until_open`](Self::wait_until_open) to
    /// wait for the first successful handshake. Must be called from within a
    /// tokio runtime.
    pub fn connect(&self, url: impl Into<String>) {
        let url = url.into();
        let generation = self.inner.supersede();
        let task = tokio::spawn(supervise(Arc::downgrade(&self.inner), url, generation));
        if let Some(previous) = lock_ignore_poison(&self.inner.supervisor).replace(task) {
            previous.abort();
        }
    }

    /// Proxy for the remote module `name`. One proxy per name is cached and
    /// shared by every caller.
    #[must_use]
    pub fn module(&self, name: &str) -> ModuleProxy {
        lock_ignore_poison(&self.inner.proxies)
            .entry(name.to_owned())
            .or_insert_with(|| ModuleProxy::new(name, Arc::downgrade(&self.inner)))
            .clone()
    }

    #[must_use]
    pub fn proxy_count(&self) -> usize {
        lock_ignore_poison(&self.inner.proxies).len()
    }

    /// Call `module.method(payload)` and wait for the response payload.
    ///
    /// The payload is returned as sent by the broker, including the
    /// `{error, code}` shape for failed calls.
    ///
    /// # Errors
    ///
    /// `NotConnected` when the link is down, `Timeout` when the configured
    /// deadline passes, `Closed` when the client shuts down mid-call.
    pub async fn call(&self, module: &str, method: &str, payload: Value) -> Result<Value, ClientError> {
        self.inner.call(module, method, payload).await
    }

    /// Queue a raw message on the open link.
    ///
    /// # Errors
    ///
    /// `NotConnected` when no link is open.
    pub fn send(&self, message: Message) -> Result<(), ClientError> {
        self.inner.send(message)
    }

    #[must_use]
    pub fn state(&self) -> LinkState {
        *self.inner.state.borrow()
    }

    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.inner.state.subscribe()
    }

    /// Wait until the link reaches `Open`.
    ///
    /// # Errors
    ///
    /// `Closed` if the state channel is gone, which cannot happen while
    /// `self` is alive.
    pub async fn wait_until_open(&self) -> Result<(), ClientError> {
        let mut rx = self.inner.state.subscribe();
        rx.wait_for(|state| *state == LinkState::Open)
            .await
            .map(|_| ())
            .map_err(|_| ClientError::Closed)
    }

    /// Module names last announced by the broker.
    #[must_use]
    pub fn modules(&self) -> Vec<String> {
        self.inner.modules.borrow().clone()
    }

    #[must_use]
    pub fn watch_modules(&self) -> watch::Receiver<Vec<String>> {
        self.inner.modules.subscribe()
    }

    /// Receive every Event the broker sends from now on.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<Message> {
        self.inner.events.subscribe()
    }

    /// Connection attempts made by the supervisor so far.
    #[must_use]
    pub fn connect_attempts(&self) -> u64 {
        self.inner.attempts.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn pending_calls(&self) -> usize {
        lock_ignore_poison(&self.inner.pending).len()
    }

    /// Stop reconnecting and close the link. Pending calls resolve with
    /// `Closed`.
    pub fn shutdown(&self) {
        self.inner.supersede();
        if let Some(handle) = lock_ignore_poison(&self.inner.supervisor).take() {
            handle.abort();
        }
        lock_ignore_poison(&self.inner.pending).clear();
        info!("client: shut down");
    }
}

impl Inner {
    /// Invalidate the running supervisor: drop the link and publish `Closed`
    /// under the link lock, then return the new generation.
    fn supersede(&self) -> u64 {
        let mut link = lock_ignore_poison(&self.link);
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        link.take();
        self.state.send_replace(LinkState::Closed);
        generation
    }

    /// Publish a supervisor transition. Returns `false`, changing nothing,
    /// when `generation` has been superseded.
    fn transition(&self, generation: u64, state: LinkState, tx: Option<mpsc::UnboundedSender<Message>>) -> bool {
        let mut link = lock_ignore_poison(&self.link);
        if self.generation.load(Ordering::Acquire) != generation {
            return false;
        }
        *link = tx;
        self.state.send_replace(state);
        true
    }

    pub(crate) async fn call(&self, module: &str, method: &str, payload: Value) -> Result<Value, ClientError> {
        let request = Message::request(module, method, payload);
        let id = request.id.clone();
        let rx = lock_ignore_poison(&self.pending).register(id.clone());

        if let Err(e) = self.send(request) {
            lock_ignore_poison(&self.pending).remove(&id);
            return Err(e);
        }

        let outcome = match self.config.call_timeout {
            Some(limit) => {
                if let Ok(outcome) = tokio::time::timeout(limit, rx).await {
                    outcome
                } else {
                    lock_ignore_poison(&self.pending).remove(&id);
                    debug!(%id, module, method, "client: call timed out");
                    return Err(ClientError::Timeout);
                }
            }
            None => rx.await,
        };
        outcome.map_err(|_| ClientError::Closed)
    }

    fn send(&self, message: Message) -> Result<(), ClientError> {
        let link = lock_ignore_poison(&self.link);
        let Some(tx) = link.as_ref() else {
            return Err(ClientError::NotConnected);
        };
        tx.send(message).map_err(|_| ClientError::NotConnected)
    }

    fn handle_message(&self, message: Message) {
        match message.kind {
            Kind::Response => {
                let Some(request_id) = message.request_id.as_deref() else {
                    debug!(id = %message.id, "client: response without requestId");
                    return;
                };
                if !lock_ignore_poison(&self.pending).complete(request_id, message.payload) {
                    debug!(request_id, "client: no pending call for response");
                }
            }
            Kind::Event => {
                if let Some(names) = module_list(&message.payload) {
                    self.modules.send_replace(names);
                }
                // No subscribers is fine.
                let _ = self.events.send(message);
            }
            Kind::Request => {
                warn!(module = %message.target, method = message.method_name(), "client: unhandled request");
            }
        }
    }
}

/// An event payload that is a list of strings names the broker's modules.
fn module_list(payload: &Value) -> Option<Vec<String>> {
    payload
        .as_array()?
        .iter()
        .map(|v| v.as_str().map(str::to_owned))
        .collect()
}

async fn supervise(weak: Weak<Inner>, url: String, generation: u64) {
    let Some(mut schedule) = weak.upgrade().map(|inner| inner.config.reconnect.schedule()) else {
        return;
    };

    loop {
        {
            let Some(inner) = weak.upgrade() else { return };
            if !inner.transition(generation, LinkState::Connecting, None) {
                return;
            }
            let attempt = inner.attempts.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(%url, attempt, "client: connecting");
        }

        match Endpoint::open(&url).await {
            Ok(endpoint) => {
                let (tx, rx) = mpsc::unbounded_channel();
                {
                    let Some(inner) = weak.upgrade() else { return };
                    if !inner.transition(generation, LinkState::Open, Some(tx)) {
                        return;
                    }
                }
                schedule.reset();
                info!(%url, "client: link open");

                let deliver_to = weak.clone();
                let outcome = endpoint
                    .run(rx, move |message| {
                        if let Some(inner) = deliver_to.upgrade() {
                            inner.handle_message(message);
                        }
                    })
                    .await;
                match outcome {
                    Ok(()) => info!(%url, "client: link closed"),
                    Err(e) => warn!(%url, error = %e, "client: link failed"),
                }
            }
            Err(e) => warn!(%url, error = %e, "client: connect failed"),
        }

        {
            let Some(inner) = weak.upgrade() else { return };
            if !inner.transition(generation, LinkState::Closed, None) {
                return;
            }
        }

        let delay = schedule.next_delay();
        debug!(delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), "client: reconnect scheduled");
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;
