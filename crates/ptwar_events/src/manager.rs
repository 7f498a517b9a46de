//! Hub manager: lazily created hubs keyed by topic name.
//!
//! Lookups take a shard read lock on the topic map. Creation goes through
//! the map's entry API, which holds the shard write lock and re-checks the
//! key, so exactly one hub per topic is ever live. Map references are never
//! held across an `.await`: the hub handle is cloned out first.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::client::{ClientId, HubClient};
use crate::hub::{DEFAULT_BUFFER_SIZE, Hub, HubStats};

/// Registry of topic hubs.
#[derive(Debug)]
pub struct HubManager<M> {
    topics: DashMap<String, Hub<M>>,
    buffer_size: usize,
}

impl<M> Default for HubManager<M>
where
    M: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<M> HubManager<M>
where
    M: Send + Sync + 'static,
{
    /// Create a manager whose hubs use [`DEFAULT_BUFFER_SIZE`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_buffer_size(DEFAULT_BUFFER_SIZE)
    }

    /// Create a manager whose hubs buffer up to `buffer_size` messages.
    #[must_use]
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            topics: DashMap::new(),
            buffer_size: buffer_size.max(1),
        }
    }

    fn existing(&self, topic: &str) -> Option<Hub<M>> {
        self.topics.get(topic).map(|hub| hub.value().clone())
    }

    fn get_or_create(&self, topic: &str) -> Hub<M> {
        if let Some(hub) = self.existing(topic) {
            return hub;
        }
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| {
                debug!(topic, "creating topic");
                Hub::new(topic, self.buffer_size)
            })
            .value()
            .clone()
    }

    /// Register `client` on `topic`, creating the topic if needed.
    pub async fn add_client(&self, topic: &str, client: Arc<dyn HubClient<M>>) {
        let id = client.id();
        let hub = self.get_or_create(topic);
        match hub.register(client).await {
            Ok(true) => debug!(topic, client = %id, "client registered"),
            Ok(false) => debug!(topic, client = %id, "client already registered"),
            Err(err) => warn!(topic, client = %id, %err, "failed to register client"),
        }
    }

    /// Unregister a client. Unknown topics and clients are ignored.
    pub async fn remove_client(&self, topic: &str, client: ClientId) {
        let Some(hub) = self.existing(topic) else {
            return;
        };
        if let Err(err) = hub.unregister(client).await {
            warn!(topic, %client, %err, "failed to unregister client");
        }
    }

    /// Publish `data` on `topic`, creating the topic if needed. Never blocks
    /// the caller; messages sent to one topic keep their order.
    pub fn send_message(&self, topic: &str, data: M) {
        self.get_or_create(topic).publish(data);
    }

    /// Per-topic counters. Each hub's stats are read atomically; the map as a
    /// whole is not a single snapshot.
    #[must_use]
    pub fn stats(&self) -> HashMap<String, HubStats> {
        self.topics
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().stats()))
            .collect()
    }

    /// Number of live topics.
    #[must_use]
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Close every hub concurrently and forget all topics. The manager stays
    /// usable; topics are recreated on next use.
    pub async fn shutdown(&self) {
        let topics: Vec<String> = self.topics.iter().map(|entry| entry.key().clone()).collect();
        let hubs: Vec<Hub<M>> = topics
            .iter()
            .filter_map(|topic| self.topics.remove(topic).map(|(_, hub)| hub))
            .collect();

        info!(topics = hubs.len(), "shutting down hubs");
        join_all(hubs.iter().map(|hub| hub.close())).await;
    }
}
