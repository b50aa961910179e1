//! taskforge Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - The async runtime
//! - Processes or the filesystem
//! - Manager internals
//!
//! All types here represent the core business domain of taskforge:
//! tasks, priorities, the persisted queue state, and the wire envelope
//! spoken between the manager and its worker processes.

pub mod envelope;
pub mod error;
pub mod ids;
pub mod state;
pub mod task;

// Re-export commonly used types
pub use envelope::{ManagerMessage, WorkerReply};
pub use error::CoreError;
pub use ids::{TaskId, WorkerId};
pub use state::{QueueState, STATE_VERSION};
pub use task::{DeadLetter, Priority, Task};
