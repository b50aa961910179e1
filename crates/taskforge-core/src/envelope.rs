//! Manager <-> worker wire messages.
//!
//! Workers speak newline-delimited JSON: each line is one envelope,
//! internally tagged by `type`. Both enums are closed: a message whose
//! `type` is not in the set fails to deserialize, and the reader
//! reports the failure instead of silently skipping the line.

use crate::ids::TaskId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A message sent from the manager to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ManagerMessage {
    /// Assign a task. The worker replies with exactly one of
    /// `task_complete` or `task_error` carrying the same task id.
    Task { task_id: TaskId, payload: String },

    /// Liveness probe; answered with `health_check_response`.
    HealthCheck,

    /// Finish no new work and terminate cleanly.
    Shutdown,
}

/// A message sent from a worker back to the manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerReply {
    /// The task executed successfully.
    TaskComplete { task_id: TaskId, result: Value },

    /// The task failed; counts against the task's retry budget.
    TaskError { task_id: TaskId, error: String },

    /// Answer to a `health_check` probe.
    HealthCheckResponse,
}
