//! Server-level systems and the notices they publish.

use std::collections::HashMap;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use ptwar_events::{ClientId, DeliveryError, HubClient, HubManager, HubStats};
use ptwar_system::{Order, ShutdownSignal, SystemFn, SystemOrder, SystemsProvider, TickContext};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Topic announcing world lifecycle changes.
pub const WORLD_TOPIC: &str = "world";

/// Topic receiving one notice per tick.
pub const TICK_TOPIC: &str = "tick";

/// Notification published on the server's hub topics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    /// Setup finished; periodic ticks are about to begin.
    WorldStarted { version: String },
    /// A periodic tick is running.
    Tick { tick: u64, delta_ms: u64 },
}

/// Hub client that writes every notice to the log as JSON.
#[derive(Debug, Default)]
pub struct LogClient {
    id: ClientId,
}

impl LogClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl HubClient<Notice> for LogClient {
    fn id(&self) -> ClientId {
        self.id
    }

    fn deliver<'a>(&'a self, message: &'a Notice) -> BoxFuture<'a, Result<(), DeliveryError>> {
        let result = serde_json::to_string(message)
            .map(|json| debug!(client = %self.id, notice = %json, "notice"))
            .map_err(|err| DeliveryError::Rejected(err.to_string()));
        futures::future::ready(result).boxed()
    }
}

/// Setup system announcing that the world is up.
pub fn world_started(hubs: Arc<HubManager<Notice>>) -> SystemFn<impl Fn(&TickContext) + Send + Sync> {
    SystemFn::new("world_started", move |_ctx: &TickContext| {
        hubs.send_message(
            WORLD_TOPIC,
            Notice::WorldStarted {
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        );
    })
}

/// Built-in periodic systems of the server.
pub struct ServerSystems {
    hubs: Arc<HubManager<Notice>>,
    stats_every: u64,
}

impl ServerSystems {
    #[must_use]
    pub fn new(hubs: Arc<HubManager<Notice>>, stats_every: u64) -> Self {
        Self { hubs, stats_every }
    }
}

impl SystemsProvider for ServerSystems {
    fn systems(&self, _shutdown: &ShutdownSignal) -> Vec<SystemOrder> {
        let heartbeat = {
            let hubs = Arc::clone(&self.hubs);
            SystemFn::new("heartbeat", move |ctx: &TickContext| {
                hubs.send_message(
                    TICK_TOPIC,
                    Notice::Tick {
                        tick: ctx.tick(),
                        delta_ms: ctx.delta().as_millis() as u64,
                    },
                );
            })
        };

        let mut systems = vec![SystemOrder::new(Order::First, heartbeat)];

        if self.stats_every > 0 {
            let hubs = Arc::clone(&self.hubs);
            let every = self.stats_every;
            systems.push(SystemOrder::new(
                Order::Last,
                SystemFn::new("hub_stats", move |ctx: &TickContext| {
                    if ctx.tick() % every == 0 {
                        report_stats(ctx.tick(), &hubs.stats());
                    }
                }),
            ));
        }

        systems
    }
}

fn report_stats(tick: u64, stats: &HashMap<String, HubStats>) {
    match serde_json::to_string(stats) {
        Ok(json) => info!(tick, topics = stats.len(), stats = %json, "hub stats"),
        Err(err) => warn!(tick, %err, "failed to encode hub stats"),
    }
}

/// Log the hub counters one last time before shutdown.
pub fn log_final_stats(stats: &HashMap<String, HubStats>) {
    match serde_json::to_string(stats) {
        Ok(json) => info!(topics = stats.len(), stats = %json, "final hub stats"),
        Err(err) => warn!(%err, "failed to encode hub stats"),
    }
}
