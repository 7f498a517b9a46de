//! Scheduler error types.

/// A [`GameLoopConfig`](crate::GameLoopConfig) field holds an invalid value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The tick interval must be non-zero.
    #[error("invalid tick_duration: must be greater than zero")]
    TickDuration,

    /// Each phase queue must hold at least one system.
    #[error("invalid events_buffer: must be greater than zero")]
    EventsBuffer,

    /// At least one worker is required to execute systems.
    #[error("invalid worker_count: must be greater than zero")]
    WorkerCount,
}

/// Errors returned by [`GameLoop`](crate::GameLoop) construction and
/// lifecycle calls.
#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    /// Construction was attempted with an invalid configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// `stop` was called while the loop was not running.
    #[error("game loop is not running")]
    NotRunning,

    /// `start` was called while the loop is running.
    #[error("game loop is already running")]
    AlreadyStarted,

    /// `start` was called after the loop was stopped.
    #[error("game loop has stopped and cannot be restarted")]
    CannotRestart,

    /// The loop has been closed and cannot be started again.
    #[error("game loop is closed")]
    Closed,

    /// The loop task terminated abnormally.
    #[error("game loop task failed: {0}")]
    Join(String),
}
