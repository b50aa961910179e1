//! Newtype wrappers for identifiers to ensure type safety.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a Task.
///
/// Task ids are drawn monotonically from the persisted task counter and
/// are never reused, even across manager restarts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct TaskId(u64);

impl TaskId {
    /// Create a TaskId from a raw counter value.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw counter value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TaskId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Unique identifier for a worker slot in the pool.
///
/// Worker ids are assigned by the pool manager and never reused within a
/// manager lifetime; a restarted worker keeps its id, a replacement for
/// a permanently failed worker gets a fresh one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct WorkerId(u32);

impl WorkerId {
    /// Create a WorkerId from a raw slot value.
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw slot value.
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

impl From<u32> for WorkerId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_ordering_follows_counter() {
        let a = TaskId::new(1);
        let b = TaskId::new(2);
        assert!(a < b);
        assert_ne!(a, b);
    }

    #[test]
    fn test_id_display() {
        assert_eq!(format!("{}", TaskId::new(42)), "42");
        assert_eq!(format!("{}", WorkerId::new(3)), "worker-3");
    }

    #[test]
    fn test_task_id_serde_is_transparent() {
        let id = TaskId::new(7);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "7");
        let back: TaskId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
