//! The persisted queue state.

use crate::ids::TaskId;
use crate::task::{DeadLetter, Task};
use serde::{Deserialize, Serialize};

/// Current on-disk layout version.
pub const STATE_VERSION: u32 = 1;

/// The sole unit of crash-recoverable state.
///
/// Everything else the manager holds (worker handles, the result cache,
/// metrics) is ephemeral and rebuilt on restart. Pending tasks are kept
/// in dispatch order: tier by tier, FIFO within each tier, so that
/// serializing, reloading, and serializing again is byte-identical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueState {
    /// Layout version; a mismatch on load is fatal.
    pub version: u32,

    /// Tasks ready for dispatch.
    pub pending: Vec<Task>,

    /// Tasks deferred until their `scheduled_for` passes.
    pub scheduled: Vec<Task>,

    /// Tasks that exhausted their retry budget.
    pub dead_letter: Vec<DeadLetter>,

    /// Monotonic id source; never decremented, never reset.
    pub task_counter: u64,
}

impl QueueState {
    /// Create an empty state at the current layout version.
    pub fn new() -> Self {
        Self {
            version: STATE_VERSION,
            pending: Vec::new(),
            scheduled: Vec::new(),
            dead_letter: Vec::new(),
            task_counter: 0,
        }
    }

    /// Draw the next task id from the counter.
    pub fn next_task_id(&mut self) -> TaskId {
        self.task_counter += 1;
        TaskId::new(self.task_counter)
    }
}

impl Default for QueueState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Priority;

    #[test]
    fn test_task_ids_are_monotonic() {
        let mut state = QueueState::new();
        let a = state.next_task_id();
        let b = state.next_task_id();
        assert!(a < b);
        assert_eq!(state.task_counter, 2);
    }

    #[test]
    fn test_round_trip_is_byte_identical() {
        let mut state = QueueState::new();
        let id = state.next_task_id();
        state.pending.push(Task::new(id, r#"{"n":1}"#, Priority::High));
        let id = state.next_task_id();
        state
            .dead_letter
            .push(DeadLetter::new(Task::new(id, "{}", Priority::Low), "gave up"));

        let first = serde_json::to_vec(&state).unwrap();
        let reloaded: QueueState = serde_json::from_slice(&first).unwrap();
        let second = serde_json::to_vec(&reloaded).unwrap();

        assert_eq!(first, second);
        assert_eq!(reloaded, state);
    }
}
