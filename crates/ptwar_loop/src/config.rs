//! Game loop configuration.

use std::num::NonZeroUsize;
use std::time::Duration;

use crate::error::ConfigError;

/// Default tick interval (10 ticks per second).
pub const DEFAULT_TICK_DURATION: Duration = Duration::from_millis(100);

/// Default capacity of each phase queue.
pub const DEFAULT_EVENTS_BUFFER: usize = 1024;

/// Construction parameters for a [`GameLoop`](crate::GameLoop).
///
/// Every field is validated by [`GameLoopConfig::validate`] before a loop is
/// built, so a running loop always has a non-zero interval, buffer and
/// worker count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameLoopConfig {
    /// Interval between two ticks.
    pub tick_duration: Duration,
    /// Capacity of each per-phase queue.
    pub events_buffer: usize,
    /// Number of long-lived workers executing systems.
    pub worker_count: usize,
}

impl Default for GameLoopConfig {
    fn default() -> Self {
        Self {
            tick_duration: DEFAULT_TICK_DURATION,
            events_buffer: DEFAULT_EVENTS_BUFFER,
            worker_count: std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
        }
    }
}

impl GameLoopConfig {
    #[must_use]
    pub fn new(tick_duration: Duration, events_buffer: usize, worker_count: usize) -> Self {
        Self {
            tick_duration,
            events_buffer,
            worker_count,
        }
    }

    /// Override the tick interval.
    #[must_use]
    pub fn with_tick_duration(mut self, tick_duration: Duration) -> Self {
        self.tick_duration = tick_duration;
        self
    }

    /// Override the per-phase queue capacity.
    #[must_use]
    pub fn with_events_buffer(mut self, events_buffer: usize) -> Self {
        self.events_buffer = events_buffer;
        self
    }

    /// Override the number of workers.
    #[must_use]
    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Check every field, reporting the first invalid one.
    ///
    /// # Errors
    ///
    /// Returns the [`ConfigError`] variant naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::WorkerCount);
        }
        if self.events_buffer == 0 {
            return Err(ConfigError::EventsBuffer);
        }
        if self.tick_duration.is_zero() {
            return Err(ConfigError::TickDuration);
        }
        Ok(())
    }
}
