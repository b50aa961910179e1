//! Manager configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Worker pool sizing and restart policy.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of workers spawned at startup.
    pub pool_size: usize,

    /// Lower bound enforced by the autoscaler.
    pub min_workers: usize,

    /// Upper bound enforced by the autoscaler.
    pub max_workers: usize,

    /// Restarts allowed per worker before its slot is abandoned.
    pub max_restarts: u32,

    /// First restart delay; doubles per restart.
    pub restart_backoff_base: Duration,

    /// Ceiling on the restart delay.
    pub restart_backoff_cap: Duration,

    /// How long shutdown waits for workers to exit cooperatively
    /// before force-terminating the stragglers.
    pub shutdown_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            min_workers: 1,
            max_workers: 8,
            max_restarts: 5,
            restart_backoff_base: Duration::from_secs(1),
            restart_backoff_cap: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Retry and backoff policy for failed tasks.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Failed attempts allowed before a task is dead-lettered.
    pub max_retries: u32,

    /// Base delay; attempt `n` waits roughly `base * 2^(n-1)` plus
    /// jitter in `0..base`.
    pub base_delay: Duration,

    /// Ceiling on the retry delay.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

/// Manager configuration.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Path of the durable queue state file.
    pub state_path: PathBuf,

    /// Quiet window coalescing rapid mutations into one write.
    pub persist_debounce: Duration,

    /// Worker program the pool spawns.
    pub worker_program: PathBuf,

    /// Extra arguments passed to the worker program.
    pub worker_args: Vec<String>,

    pub pool: PoolConfig,
    pub retry: RetryConfig,

    /// How often due scheduled tasks are moved back into the queue.
    pub sweep_interval: Duration,

    /// How often workers are probed.
    pub health_check_interval: Duration,

    /// How long a probe may stay unanswered.
    pub health_check_timeout: Duration,

    /// Unanswered probes in a row before a worker is force-terminated.
    pub health_failure_threshold: u32,

    /// How often pool load is evaluated.
    pub autoscale_interval: Duration,

    /// Load (pending per active worker) above which the pool grows.
    pub scale_up_load: f64,

    /// Load below which one idle worker is retired.
    pub scale_down_load: f64,

    /// Result cache time-to-live.
    pub cache_ttl: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            state_path: PathBuf::from("taskforge-state.json"),
            persist_debounce: Duration::from_millis(100),
            worker_program: PathBuf::from("taskforge-worker"),
            worker_args: Vec::new(),
            pool: PoolConfig::default(),
            retry: RetryConfig::default(),
            sweep_interval: Duration::from_millis(500),
            health_check_interval: Duration::from_secs(10),
            health_check_timeout: Duration::from_secs(3),
            health_failure_threshold: 3,
            autoscale_interval: Duration::from_secs(5),
            scale_up_load: 4.0,
            scale_down_load: 0.5,
            cache_ttl: Duration::from_secs(60),
        }
    }
}

impl ManagerConfig {
    /// Reject configurations the manager cannot run with. Called once
    /// at startup; a failure here is fatal.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.pool_size == 0 || self.pool.min_workers == 0 {
            return Err(ConfigError::InvalidPoolSize(self.pool.pool_size));
        }
        if self.pool.pool_size < self.pool.min_workers
            || self.pool.pool_size > self.pool.max_workers
            || self.pool.min_workers > self.pool.max_workers
        {
            return Err(ConfigError::PoolBounds {
                min: self.pool.min_workers,
                max: self.pool.max_workers,
                size: self.pool.pool_size,
            });
        }
        if self.retry.max_retries == 0 {
            return Err(ConfigError::ZeroRetries);
        }
        if self.scale_down_load >= self.scale_up_load {
            return Err(ConfigError::Watermarks {
                low: self.scale_down_load,
                high: self.scale_up_load,
            });
        }
        if self.health_failure_threshold == 0 {
            return Err(ConfigError::ZeroHealthThreshold);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ManagerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_pool_size_is_fatal() {
        let mut config = ManagerConfig::default();
        config.pool.pool_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPoolSize(0))
        ));
    }

    #[test]
    fn test_pool_size_outside_bounds_is_fatal() {
        let mut config = ManagerConfig::default();
        config.pool.pool_size = 20;
        config.pool.max_workers = 8;
        assert!(matches!(config.validate(), Err(ConfigError::PoolBounds { .. })));
    }

    #[test]
    fn test_inverted_watermarks_are_fatal() {
        let mut config = ManagerConfig::default();
        config.scale_up_load = 0.5;
        config.scale_down_load = 4.0;
        assert!(matches!(config.validate(), Err(ConfigError::Watermarks { .. })));
    }
}
