//! Task throughput counters and latency aggregation.

use std::collections::VecDeque;
use std::time::Duration;

/// Default number of duration samples kept for percentile math.
const DEFAULT_SAMPLE_WINDOW: usize = 1024;

/// Monotonic event counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub cache_hits: u64,
    pub worker_restarts: u64,
    pub workers_failed: u64,
    pub persist_errors: u64,
}

/// Aggregate latency statistics over the sample window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyStats {
    pub count: usize,
    pub mean: Duration,
    pub min: Duration,
    pub max: Duration,
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
}

/// Point-in-time metrics view.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub counters: Counters,
    /// None until at least one task duration has been recorded.
    pub latency: Option<LatencyStats>,
}

/// Collects counters and a bounded ring of task duration samples;
/// oldest samples are evicted first.
#[derive(Debug)]
pub struct MetricsCollector {
    counters: Counters,
    samples: VecDeque<Duration>,
    window: usize,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_SAMPLE_WINDOW)
    }

    pub fn with_window(window: usize) -> Self {
        Self {
            counters: Counters::default(),
            samples: VecDeque::with_capacity(window.min(DEFAULT_SAMPLE_WINDOW)),
            window: window.max(1),
        }
    }

    pub fn incr_submitted(&mut self) {
        self.counters.submitted += 1;
    }

    pub fn incr_completed(&mut self) {
        self.counters.completed += 1;
    }

    pub fn incr_failed(&mut self) {
        self.counters.failed += 1;
    }

    pub fn incr_retried(&mut self) {
        self.counters.retried += 1;
    }

    pub fn incr_dead_lettered(&mut self) {
        self.counters.dead_lettered += 1;
    }

    pub fn incr_cache_hits(&mut self) {
        self.counters.cache_hits += 1;
    }

    pub fn incr_worker_restarts(&mut self) {
        self.counters.worker_restarts += 1;
    }

    pub fn incr_workers_failed(&mut self) {
        self.counters.workers_failed += 1;
    }

    pub fn set_persist_errors(&mut self, count: u64) {
        self.counters.persist_errors = count;
    }

    /// Record one task's execution duration.
    pub fn record_duration(&mut self, duration: Duration) {
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(duration);
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self.counters,
            latency: self.latency_stats(),
        }
    }

    fn latency_stats(&self) -> Option<LatencyStats> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted: Vec<Duration> = self.samples.iter().copied().collect();
        sorted.sort_unstable();

        let count = sorted.len();
        let total: Duration = sorted.iter().sum();
        Some(LatencyStats {
            count,
            mean: total / count as u32,
            min: sorted[0],
            max: sorted[count - 1],
            p50: percentile(&sorted, 50.0),
            p95: percentile(&sorted, 95.0),
            p99: percentile(&sorted, 99.0),
        })
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Nearest-rank percentile over an already sorted slice.
fn percentile(sorted: &[Duration], p: f64) -> Duration {
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_counters_start_at_zero() {
        let metrics = MetricsCollector::new();
        assert_eq!(metrics.counters(), Counters::default());
        assert!(metrics.snapshot().latency.is_none());
    }

    #[test]
    fn test_percentiles_over_known_samples() {
        let mut metrics = MetricsCollector::new();
        for n in 1..=100 {
            metrics.record_duration(ms(n));
        }
        let stats = metrics.snapshot().latency.unwrap();
        assert_eq!(stats.count, 100);
        assert_eq!(stats.min, ms(1));
        assert_eq!(stats.max, ms(100));
        assert_eq!(stats.p50, ms(50));
        assert_eq!(stats.p95, ms(95));
        assert_eq!(stats.p99, ms(99));
        assert_eq!(stats.mean, ms(50) + Duration::from_micros(500));
    }

    #[test]
    fn test_ring_evicts_oldest_samples_first() {
        let mut metrics = MetricsCollector::with_window(4);
        for n in 1..=6 {
            metrics.record_duration(ms(n));
        }
        let stats = metrics.snapshot().latency.unwrap();
        // samples 1 and 2 were evicted
        assert_eq!(stats.count, 4);
        assert_eq!(stats.min, ms(3));
        assert_eq!(stats.max, ms(6));
    }

    #[test]
    fn test_single_sample_statistics_agree() {
        let mut metrics = MetricsCollector::new();
        metrics.record_duration(ms(42));
        let stats = metrics.snapshot().latency.unwrap();
        assert_eq!(stats.min, ms(42));
        assert_eq!(stats.max, ms(42));
        assert_eq!(stats.p50, ms(42));
        assert_eq!(stats.p99, ms(42));
        assert_eq!(stats.mean, ms(42));
    }
}
