//! Per-tick execution context provided to systems.

use std::time::Duration;

use tokio::sync::watch;

/// Value produced once per tick and handed, read-only, to every system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickMessage {
    /// Monotonically increasing tick counter. Setup systems observe `0`.
    pub tick: u64,
    /// Wall-clock time elapsed since the previous tick started.
    pub delta: Duration,
}

impl TickMessage {
    #[must_use]
    pub const fn new(tick: u64, delta: Duration) -> Self {
        Self { tick, delta }
    }
}

/// Read-only view of the scheduler's cancellation scope.
///
/// Cheap to clone. A dropped sender counts as a shutdown, so a system never
/// waits on a scope that no longer exists.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Wrap the receiving half of a `watch` channel whose value flips to
    /// `true` on shutdown.
    #[must_use]
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    /// Returns `true` once shutdown has been requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolves once shutdown has been requested.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        // Err means the sender is gone, which is a shutdown as well.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

/// Context provided to a system on each tick.
#[derive(Debug, Clone)]
pub struct TickContext {
    /// The tick being executed.
    pub message: TickMessage,
    /// Cancellation scope of the scheduler running this tick.
    pub shutdown: ShutdownSignal,
}

impl TickContext {
    #[must_use]
    pub fn new(message: TickMessage, shutdown: ShutdownSignal) -> Self {
        Self { message, shutdown }
    }

    /// The current tick number.
    #[must_use]
    pub fn tick(&self) -> u64 {
        self.message.tick
    }

    /// Time elapsed since the previous tick.
    #[must_use]
    pub fn delta(&self) -> Duration {
        self.message.delta
    }
}
