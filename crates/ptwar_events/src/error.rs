//! Hub error types.

/// A client failed to accept a message.
///
/// Delivery errors are logged by the hub and never reach the publisher.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The client refused or failed to process the message.
    #[error("delivery rejected: {0}")]
    Rejected(String),

    /// The client's underlying sink is gone.
    #[error("client disconnected")]
    Disconnected,
}

/// Errors returned by direct [`Hub`](crate::Hub) operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    /// The hub's actor has exited; the operation had no effect.
    #[error("hub is closed")]
    Closed,
}
