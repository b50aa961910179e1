//! Manager error types.

use taskforge_core::CoreError;
use thiserror::Error;

/// Fatal configuration problems, rejected synchronously at startup and
/// never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid pool size {0}: at least one worker is required")]
    InvalidPoolSize(usize),

    #[error("Pool bounds {min}..={max} do not admit the initial size {size}")]
    PoolBounds { min: usize, max: usize, size: usize },

    #[error("max_retries must be at least 1")]
    ZeroRetries,

    #[error("scale_down_load {low} must be below scale_up_load {high}")]
    Watermarks { low: f64, high: f64 },

    #[error("health_failure_threshold must be at least 1")]
    ZeroHealthThreshold,
}

/// Errors from the durable store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Queue state I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Queue state decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Errors surfaced through the manager API.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to spawn worker: {0}")]
    Spawn(String),

    #[error("Failed to send to worker: {0}")]
    SendFailed(String),

    /// The manager is shutting down and admits no new tasks.
    #[error("manager shutting down")]
    ShuttingDown,
}
