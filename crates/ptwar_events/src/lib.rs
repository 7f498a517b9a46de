//! # ptwar_events
//!
//! Topic-based publish/subscribe hub for best-effort notifications.
//!
//! This crate provides:
//!
//! - [`HubClient`]: the consumer contract, identified by a [`ClientId`].
//! - [`ChannelClient`]: a client that forwards messages into a channel.
//! - [`Hub`]: one topic's actor: client set, bounded broadcast buffer,
//!   concurrent fan-out and live [`HubStats`].
//! - [`HubManager`]: hubs keyed by topic, created on first use.
//!
//! Delivery is best effort: a failing client is logged and skipped, and
//! messages still buffered when a hub closes are dropped.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use ptwar_events::{ChannelClient, HubManager};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let manager = HubManager::<String>::new();
//! let (client, mut rx) = ChannelClient::<String>::new();
//! manager.add_client("world", Arc::new(client)).await;
//!
//! manager.send_message("world", "squad spawned".to_string());
//! assert_eq!(rx.recv().await.as_deref(), Some("squad spawned"));
//!
//! manager.shutdown().await;
//! # }
//! ```

pub mod client;
pub mod error;
pub mod hub;
pub mod manager;

pub use client::{ChannelClient, ClientId, HubClient};
pub use error::{DeliveryError, HubError};
pub use hub::{DEFAULT_BUFFER_SIZE, Hub, HubStats};
pub use manager::HubManager;
