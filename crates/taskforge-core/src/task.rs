//! Task types flowing through the queue.

use crate::error::CoreError;
use crate::ids::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Priority tier of a task.
///
/// Tiers are strict: the dispatcher drains `High` before `Normal` and
/// `Normal` before `Low`. Within a tier tasks are FIFO, so no task is
/// starved by its peers; sustained high-tier traffic can starve the
/// lower tiers indefinitely, which is an accepted trade-off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    /// All tiers in dispatch order (highest first).
    pub const ORDERED: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];

    /// The canonical lowercase name of the tier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            other => Err(CoreError::UnknownPriority(other.to_string())),
        }
    }
}

/// A Task is the unit of work submitted to the manager.
///
/// A task is in exactly one of pending, scheduled, in-flight, or
/// dead-letter at any time; its id is stable across all transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier.
    pub id: TaskId,

    /// Opaque payload, interpreted only by workers.
    pub payload: String,

    /// Priority tier.
    pub priority: Priority,

    /// If set, the task is invisible to the dispatcher until this time.
    pub scheduled_for: Option<DateTime<Utc>>,

    /// Failed execution attempts so far. Worker crashes do not count.
    pub retry_count: u32,

    /// When the task was created.
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Create a new Task.
    pub fn new(id: TaskId, payload: impl Into<String>, priority: Priority) -> Self {
        Self {
            id,
            payload: payload.into(),
            priority,
            scheduled_for: None,
            retry_count: 0,
            created_at: Utc::now(),
        }
    }

    /// Builder method to defer the task until a future time.
    pub fn with_scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_for = Some(at);
        self
    }

    /// Whether the task is visible to the dispatcher at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.scheduled_for {
            Some(at) => at <= now,
            None => true,
        }
    }
}

/// A task that exhausted its retry budget, kept for manual inspection
/// rather than automatic reprocessing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// The task as it looked on its final attempt.
    pub task: Task,

    /// The last error reported by a worker.
    pub error: String,

    /// When the task was moved to the dead-letter list.
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    /// Record a task's final failure.
    pub fn new(task: Task, error: impl Into<String>) -> Self {
        Self {
            task,
            error: error.into(),
            failed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_priority_parse() {
        assert_eq!("high".parse::<Priority>().unwrap(), Priority::High);
        assert_eq!("normal".parse::<Priority>().unwrap(), Priority::Normal);
        assert_eq!("low".parse::<Priority>().unwrap(), Priority::Low);
    }

    #[test]
    fn test_priority_parse_rejects_unknown_tier() {
        let err = "urgent".parse::<Priority>().unwrap_err();
        assert!(matches!(err, CoreError::UnknownPriority(ref s) if s == "urgent"));
    }

    #[test]
    fn test_dispatch_order() {
        assert_eq!(
            Priority::ORDERED,
            [Priority::High, Priority::Normal, Priority::Low]
        );
    }

    #[test]
    fn test_task_due_now_when_unscheduled() {
        let task = Task::new(TaskId::new(1), "{}", Priority::Normal);
        assert!(task.is_due(Utc::now()));
    }

    #[test]
    fn test_scheduled_task_not_due_until_time_passes() {
        let now = Utc::now();
        let task = Task::new(TaskId::new(1), "{}", Priority::Normal)
            .with_scheduled_for(now + Duration::seconds(60));
        assert!(!task.is_due(now));
        assert!(task.is_due(now + Duration::seconds(61)));
    }

    #[test]
    fn test_dead_letter_preserves_task_id() {
        let task = Task::new(TaskId::new(9), "{}", Priority::Low);
        let dead = DeadLetter::new(task, "boom");
        assert_eq!(dead.task.id, TaskId::new(9));
        assert_eq!(dead.error, "boom");
    }
}
