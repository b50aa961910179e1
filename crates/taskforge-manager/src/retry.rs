//! Retry backoff and dead-letter decisions.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// What to do with a task after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Schedule another attempt after the delay.
    Retry { delay: Duration },
    /// Budget exhausted; move the task to the dead-letter list.
    GiveUp,
}

/// Exponential backoff with jitter, capped. Applies only to task
/// execution errors; worker crashes never consume retry budget.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Decide the task's fate. `retry_count` is the failed-attempt
    /// count including the failure being handled.
    pub fn after_failure(&self, retry_count: u32) -> RetryDecision {
        if retry_count >= self.config.max_retries {
            RetryDecision::GiveUp
        } else {
            RetryDecision::Retry {
                delay: self.backoff(retry_count),
            }
        }
    }

    /// `min(base * 2^(retry_count-1) + jitter(0..base), cap)`. The
    /// jitter spreads simultaneous failures so retries do not arrive as
    /// a synchronized storm.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1).min(20);
        let base_ms = self.config.base_delay.as_millis() as u64;
        let raw_ms = base_ms.saturating_mul(1u64 << exponent);
        let jitter_ms = if base_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..base_ms)
        };
        Duration::from_millis(raw_ms.saturating_add(jitter_ms)).min(self.config.max_delay)
    }
}
