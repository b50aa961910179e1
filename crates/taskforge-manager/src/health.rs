//! Worker liveness probing.
//!
//! The monitor only does the bookkeeping: which workers have an
//! outstanding probe and for how long. The control loop sends the
//! probes, counts consecutive failures on the worker handles, and
//! escalates to forced termination at the configured threshold.

use std::collections::HashMap;
use std::time::Duration;

use taskforge_core::WorkerId;
use tokio::time::Instant;

/// Result of one probe round.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct HealthTick {
    /// Workers whose previous probe went unanswered past the timeout.
    pub timed_out: Vec<WorkerId>,
    /// Workers to probe now.
    pub probe: Vec<WorkerId>,
}

#[derive(Debug)]
pub struct HealthMonitor {
    timeout: Duration,
    outstanding: HashMap<WorkerId, Instant>,
}

impl HealthMonitor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            outstanding: HashMap::new(),
        }
    }

    /// Run one probe round over the currently connected workers.
    /// Workers not in `connected` are skipped and their bookkeeping
    /// dropped (a closed channel is not probed).
    pub fn tick(&mut self, connected: &[WorkerId], now: Instant) -> HealthTick {
        self.outstanding.retain(|id, _| connected.contains(id));

        let mut round = HealthTick::default();
        for &id in connected {
            match self.outstanding.get(&id) {
                Some(&sent) if now.duration_since(sent) >= self.timeout => {
                    self.outstanding.remove(&id);
                    round.timed_out.push(id);
                }
                Some(_) => {} // probe still within its window
                None => {
                    self.outstanding.insert(id, now);
                    round.probe.push(id);
                }
            }
        }
        round
    }

    /// The worker answered; returns false for an unsolicited response.
    pub fn on_response(&mut self, id: WorkerId) -> bool {
        self.outstanding.remove(&id).is_some()
    }

    /// Drop bookkeeping for a worker that exited or lost its channel.
    pub fn forget(&mut self, id: WorkerId) {
        self.outstanding.remove(&id);
    }
}
