//! In-memory ordering of ready tasks.

use std::collections::VecDeque;

use taskforge_core::{Priority, Task};

/// Three independent FIFO tiers, drained high -> normal -> low.
///
/// Within a tier no task is starved; across tiers, sustained high
/// traffic starves the lower tiers indefinitely. That is an accepted
/// trade-off of strict tier precedence, not a bug. Invalid tier names
/// are rejected earlier, when a priority is parsed ([`Priority`] makes
/// an unknown tier unrepresentable here).
#[derive(Debug, Default)]
pub struct PriorityQueue {
    high: VecDeque<Task>,
    normal: VecDeque<Task>,
    low: VecDeque<Task>,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task to the tail of its tier.
    pub fn enqueue(&mut self, task: Task) {
        self.tier_mut(task.priority).push_back(task);
    }

    /// Return a task to the head of its tier, preserving its original
    /// position relative to later submissions. Used when a dispatch is
    /// rolled back (no worker, worker crash).
    pub fn requeue_front(&mut self, task: Task) {
        self.tier_mut(task.priority).push_front(task);
    }

    /// Pop the head of the highest non-empty tier.
    pub fn dequeue(&mut self) -> Option<Task> {
        self.high
            .pop_front()
            .or_else(|| self.normal.pop_front())
            .or_else(|| self.low.pop_front())
    }

    pub fn len(&self) -> usize {
        self.high.len() + self.normal.len() + self.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Per-tier sizes in dispatch order.
    pub fn tier_sizes(&self) -> [(Priority, usize); 3] {
        [
            (Priority::High, self.high.len()),
            (Priority::Normal, self.normal.len()),
            (Priority::Low, self.low.len()),
        ]
    }

    /// All queued tasks in dispatch order (tier by tier, FIFO within),
    /// cloned for persistence snapshots.
    pub fn snapshot(&self) -> Vec<Task> {
        self.high
            .iter()
            .chain(self.normal.iter())
            .chain(self.low.iter())
            .cloned()
            .collect()
    }

    fn tier_mut(&mut self, priority: Priority) -> &mut VecDeque<Task> {
        match priority {
            Priority::High => &mut self.high,
            Priority::Normal => &mut self.normal,
            Priority::Low => &mut self.low,
        }
    }
}
