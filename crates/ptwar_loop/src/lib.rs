//! # ptwar_loop
//!
//! Fixed-rate tick scheduler for the PTWAR world server.
//!
//! A [`GameLoop`] owns a clock, a [`SystemRegistry`] and a [`WorkerPool`].
//! On every tick each registered system is placed into the queue of its
//! [`Order`](ptwar_system::Order) phase; the queues are drained highest phase
//! first onto the workers, and the tick ends once nothing is in flight.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use ptwar_loop::{GameLoop, GameLoopConfig};
//! use ptwar_system::{Order, SystemFn};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ptwar_loop::LoopError> {
//!     let game_loop = GameLoop::new(
//!         GameLoopConfig::default().with_tick_duration(Duration::from_millis(50)),
//!     )?;
//!     game_loop.add_system(
//!         Order::First,
//!         SystemFn::new("hello", |ctx| println!("tick {}", ctx.tick())),
//!     );
//!
//!     game_loop.start()?;
//!     tokio::time::sleep(Duration::from_secs(1)).await;
//!     game_loop.stop().await
//! }
//! ```

pub mod config;
pub mod error;
mod phase;
pub mod registry;
pub mod tick;
pub mod worker;

pub use config::GameLoopConfig;
pub use error::{ConfigError, LoopError};
pub use registry::SystemRegistry;
pub use tick::{GameLoop, LoopState};
pub use worker::{InFlight, WorkerPool};
