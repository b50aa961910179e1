//! Load-based pool sizing.

/// Scaling decision for one evaluation interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Add one worker.
    Grow,
    /// Retire one idle worker.
    Shrink,
    /// Leave the pool alone.
    Hold,
}

/// Watermark controller over `load = pending / max(active, 1)`.
///
/// Deliberately hysteresis-free: no smoothing, no PID. Rapid add/remove
/// flapping under an oscillating load is a known, accepted limitation.
#[derive(Debug, Clone)]
pub struct Autoscaler {
    scale_up_load: f64,
    scale_down_load: f64,
    min_workers: usize,
    max_workers: usize,
}

impl Autoscaler {
    pub fn new(
        scale_up_load: f64,
        scale_down_load: f64,
        min_workers: usize,
        max_workers: usize,
    ) -> Self {
        Self {
            scale_up_load,
            scale_down_load,
            min_workers,
            max_workers,
        }
    }

    pub fn evaluate(&self, pending: usize, active_workers: usize) -> ScaleDecision {
        let load = pending as f64 / active_workers.max(1) as f64;
        if load > self.scale_up_load && active_workers < self.max_workers {
            ScaleDecision::Grow
        } else if load < self.scale_down_load && active_workers > self.min_workers {
            ScaleDecision::Shrink
        } else {
            ScaleDecision::Hold
        }
    }
}
