//! taskforge Manager Library
//!
//! This crate provides the manager side of taskforge: the priority
//! queue, the durable store, the result cache, and a supervised pool of
//! isolated worker processes, all driven by a single control loop.

pub mod autoscaler;
pub mod cache;
pub mod config;
pub mod error;
pub mod health;
pub mod manager;
pub mod metrics;
pub mod pool;
pub mod process;
pub mod queue;
pub mod retry;
pub mod store;

pub use config::{ManagerConfig, PoolConfig, RetryConfig};
pub use error::{ConfigError, ManagerError, StoreError};
pub use manager::{
    ManagerHandle, ManagerSnapshot, QueueManager, Submission, TaskOutcome, WorkerStats,
};
pub use pool::{WorkerChannels, WorkerEvent, WorkerLauncher};
pub use process::ProcessLauncher;
