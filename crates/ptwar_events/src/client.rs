//! Hub clients: the consumers a topic fans messages out to.

use std::fmt;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::DeliveryError;

/// Stable identity of a client within a hub.
///
/// Hubs hold clients in a set keyed by this id, so registering the same
/// client twice is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(Uuid);

impl ClientId {
    /// Generate a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A consumer of topic messages.
pub trait HubClient<M>: Send + Sync {
    /// Identity used for registry membership.
    fn id(&self) -> ClientId;

    /// Attempt to deliver one message.
    fn deliver<'a>(&'a self, message: &'a M) -> BoxFuture<'a, Result<(), DeliveryError>>;
}

/// Client that forwards every message into an unbounded channel.
///
/// Handy for bridging a topic into a task that owns some other sink.
#[derive(Debug)]
pub struct ChannelClient<M> {
    id: ClientId,
    tx: mpsc::UnboundedSender<M>,
}

impl<M> ChannelClient<M> {
    /// Create a client together with the receiving end of its channel.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<M>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: ClientId::new(),
                tx,
            },
            rx,
        )
    }
}

impl<M> HubClient<M> for ChannelClient<M>
where
    M: Clone + Send + Sync,
{
    fn id(&self) -> ClientId {
        self.id
    }

    fn deliver<'a>(&'a self, message: &'a M) -> BoxFuture<'a, Result<(), DeliveryError>> {
        let result = self
            .tx
            .send(message.clone())
            .map_err(|_| DeliveryError::Disconnected);
        futures::future::ready(result).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_ids_are_unique() {
        assert_ne!(ClientId::new(), ClientId::new());
    }

    #[tokio::test]
    async fn test_channel_client_forwards() {
        let (client, mut rx) = ChannelClient::<String>::new();
        client.deliver(&"hello".to_string()).await.unwrap();
        assert_eq!(rx.recv().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_channel_client_reports_disconnect() {
        let (client, rx) = ChannelClient::<u32>::new();
        drop(rx);
        let err = client.deliver(&1).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Disconnected));
    }
}
