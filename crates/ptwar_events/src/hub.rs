//! Single-topic hub actor.
//!
//! Every hub runs one task that owns the topic's client set. Register,
//! unregister, broadcast and close requests all arrive over channels and are
//! handled one at a time by that task, so the set itself needs no lock. The
//! stats counters are shared atomics because deliveries run on their own
//! tasks and update them concurrently.
//!
//! Non-blocking publishes go through an unbounded staging queue drained by a
//! single forwarding task, so they reach the broadcast buffer in call order
//! even while it is full.
//!
//! Close wins over pending work: messages still in the broadcast buffer or
//! the staging queue when the hub closes are never delivered.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::client::{ClientId, HubClient};
use crate::error::HubError;

/// Default capacity of a hub's broadcast buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 256;

/// Capacity of the register/unregister channel.
const CONTROL_BUFFER_SIZE: usize = 16;

/// Live counters of a topic.
///
/// Each field is read atomically on its own; the three values are not a
/// consistent snapshot of one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Clients currently registered.
    pub clients: u64,
    /// Delivery attempts started since the hub was created.
    pub total_messages_sent: u64,
    /// Delivery attempts not finished yet.
    pub waiting_messages: u64,
}

#[derive(Debug, Default)]
struct Counters {
    clients: AtomicU64,
    sent: AtomicU64,
    waiting: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> HubStats {
        HubStats {
            clients: self.clients.load(Ordering::Acquire),
            total_messages_sent: self.sent.load(Ordering::Acquire),
            waiting_messages: self.waiting.load(Ordering::Acquire),
        }
    }
}

/// Decrements the waiting counter when a delivery attempt ends.
struct WaitingGuard(Arc<Counters>);

impl Drop for WaitingGuard {
    fn drop(&mut self) {
        self.0.waiting.fetch_sub(1, Ordering::AcqRel);
    }
}

enum Control<M> {
    Register(Arc<dyn HubClient<M>>, oneshot::Sender<bool>),
    Unregister(ClientId, oneshot::Sender<bool>),
}

struct Inner<M> {
    topic: Arc<str>,
    control: mpsc::Sender<Control<M>>,
    broadcast: mpsc::Sender<Arc<M>>,
    staging: mpsc::UnboundedSender<Arc<M>>,
    close: watch::Sender<bool>,
    counters: Arc<Counters>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Handle to a topic's actor. Cheap to clone; all clones address the same
/// actor.
pub struct Hub<M> {
    inner: Arc<Inner<M>>,
}

impl<M> Clone for Hub<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M> fmt::Debug for Hub<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("topic", &self.inner.topic)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<M> Hub<M>
where
    M: Send + Sync + 'static,
{
    /// Spawn the actor for `topic`. Must be called within a tokio runtime.
    #[must_use]
    pub fn new(topic: impl Into<Arc<str>>, buffer_size: usize) -> Self {
        let topic = topic.into();
        let (control, control_rx) = mpsc::channel(CONTROL_BUFFER_SIZE);
        let (broadcast, broadcast_rx) = mpsc::channel(buffer_size.max(1));
        let (staging, staging_rx) = mpsc::unbounded_channel();
        let (close, close_rx) = watch::channel(false);
        let counters = Arc::new(Counters::default());

        let forwarder = tokio::spawn(forward(staging_rx, broadcast.clone(), close_rx.clone()));

        let actor = Actor {
            topic: Arc::clone(&topic),
            clients: HashMap::new(),
            counters: Arc::clone(&counters),
        };
        let actor = tokio::spawn(actor.run(control_rx, broadcast_rx, close_rx));
        debug!(topic = %topic, buffer_size, "hub started");

        Self {
            inner: Arc::new(Inner {
                topic,
                control,
                broadcast,
                staging,
                close,
                counters,
                tasks: Mutex::new(vec![actor, forwarder]),
            }),
        }
    }

    /// Add a client to the topic. Returns `true` if it was not registered
    /// before.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub has been closed.
    pub async fn register(&self, client: Arc<dyn HubClient<M>>) -> Result<bool, HubError> {
        let (ack, done) = oneshot::channel();
        self.inner
            .control
            .send(Control::Register(client, ack))
            .await
            .map_err(|_| HubError::Closed)?;
        done.await.map_err(|_| HubError::Closed)
    }

    /// Remove a client from the topic. Returns `true` if it was registered;
    /// removing an unknown client is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub has been closed.
    pub async fn unregister(&self, id: ClientId) -> Result<bool, HubError> {
        let (ack, done) = oneshot::channel();
        self.inner
            .control
            .send(Control::Unregister(id, ack))
            .await
            .map_err(|_| HubError::Closed)?;
        done.await.map_err(|_| HubError::Closed)
    }

    /// Enqueue a message, waiting while the buffer is full.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub has been closed.
    pub async fn broadcast(&self, message: M) -> Result<(), HubError> {
        self.inner
            .broadcast
            .send(Arc::new(message))
            .await
            .map_err(|_| HubError::Closed)
    }

    /// Enqueue a message without blocking the caller.
    ///
    /// Messages are staged and forwarded to the broadcast buffer in call
    /// order, waiting for room when it is full. Messages published after the
    /// hub closed are dropped.
    pub fn publish(&self, message: M) {
        if self.inner.staging.send(Arc::new(message)).is_err() {
            debug!(topic = %self.inner.topic, "hub closed, message dropped");
        }
    }

    /// Stop the actor and wait for it to exit. Queued messages are discarded.
    /// Closing an already closed hub returns immediately.
    pub async fn close(&self) {
        self.inner.close.send_replace(true);
        let tasks = std::mem::take(
            &mut *self
                .inner
                .tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for task in tasks {
            if let Err(err) = task.await {
                warn!(topic = %self.inner.topic, %err, "hub task failed");
            }
        }
    }
}

/// Move staged messages into the broadcast buffer one at a time.
async fn forward<M>(
    mut staging: mpsc::UnboundedReceiver<Arc<M>>,
    broadcast: mpsc::Sender<Arc<M>>,
    mut close_rx: watch::Receiver<bool>,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = close_rx.changed() => break,
            Some(message) = staging.recv() => message,
            else => break,
        };
        tokio::select! {
            biased;
            _ = close_rx.changed() => break,
            sent = broadcast.send(message) => if sent.is_err() { break },
        }
    }
}

impl<M> Hub<M> {
    /// The topic this hub serves.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    /// Atomic snapshot of the topic counters.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        self.inner.counters.snapshot()
    }
}

struct Actor<M> {
    topic: Arc<str>,
    clients: HashMap<ClientId, Arc<dyn HubClient<M>>>,
    counters: Arc<Counters>,
}

impl<M> Actor<M>
where
    M: Send + Sync + 'static,
{
    async fn run(
        mut self,
        mut control_rx: mpsc::Receiver<Control<M>>,
        mut broadcast_rx: mpsc::Receiver<Arc<M>>,
        mut close_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                biased;
                // Any change, or the sender going away, means close.
                _ = close_rx.changed() => break,
                Some(control) = control_rx.recv() => self.handle_control(control),
                Some(message) = broadcast_rx.recv() => self.fan_out(message),
                else => break,
            }
        }
        debug!(topic = %self.topic, "hub stopped");
    }

    fn handle_control(&mut self, control: Control<M>) {
        match control {
            Control::Register(client, ack) => {
                let added = match self.clients.entry(client.id()) {
                    Entry::Vacant(slot) => {
                        slot.insert(client);
                        self.counters.clients.fetch_add(1, Ordering::AcqRel);
                        true
                    }
                    Entry::Occupied(_) => false,
                };
                let _ = ack.send(added);
            }
            Control::Unregister(id, ack) => {
                let removed = self.clients.remove(&id).is_some();
                if removed {
                    self.counters.clients.fetch_sub(1, Ordering::AcqRel);
                }
                let _ = ack.send(removed);
            }
        }
    }

    fn fan_out(&self, message: Arc<M>) {
        for client in self.clients.values() {
            self.counters.sent.fetch_add(1, Ordering::AcqRel);
            self.counters.waiting.fetch_add(1, Ordering::AcqRel);

            let waiting = WaitingGuard(Arc::clone(&self.counters));
            let client = Arc::clone(client);
            let message = Arc::clone(&message);
            let topic = Arc::clone(&self.topic);
            tokio::spawn(async move {
                let _waiting = waiting;
                if let Err(err) = client.deliver(&message).await {
                    warn!(topic = %topic, client = %client.id(), %err, "delivery failed");
                }
            });
        }
    }
}
