//! # ptwar_system
//!
//! Shared primitives between the tick scheduler and the code it drives.
//!
//! This crate provides:
//!
//! - [`Order`]: the fixed set of phases a tick is split into.
//! - [`System`]: the contract every per-tick behaviour satisfies.
//! - [`SystemFn`]: adapter turning a plain closure into a [`System`].
//! - [`SystemOrder`] / [`SystemsProvider`]: bulk registration.
//! - [`TickMessage`] / [`TickContext`]: what a system receives each tick.
//! - [`ShutdownSignal`]: read-only view of the scheduler's cancellation.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicU64, Ordering};
//!
//! use ptwar_system::{Order, SystemFn, SystemOrder};
//!
//! let counter = Arc::new(AtomicU64::new(0));
//! let c = counter.clone();
//! let entry = SystemOrder::new(
//!     Order::First,
//!     SystemFn::new("counter", move |_ctx| {
//!         c.fetch_add(1, Ordering::Relaxed);
//!     }),
//! );
//! assert_eq!(entry.order, Order::First);
//! ```

pub mod context;
pub mod order;
pub mod system;

pub use context::{ShutdownSignal, TickContext, TickMessage};
pub use order::Order;
pub use system::{System, SystemFn, SystemOrder, SystemsProvider};
