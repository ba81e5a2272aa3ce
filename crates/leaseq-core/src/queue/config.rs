//! Queue configuration.

use std::path::PathBuf;
use std::time::Duration;

use super::RetryPolicy;

/// Polling interval of the sweeper between two scans of the lease store.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Root directory; holds `queue/`, `retry_queue/` and `running/`.
    pub path: PathBuf,
    pub retry: RetryPolicy,
    pub sweep_interval: Duration,
}

impl QueueConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            retry: RetryPolicy::unlimited(),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    pub fn with_retry_limit(mut self, limit: u32) -> Self {
        self.retry = RetryPolicy::with_limit(limit);
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn queue_dir(&self) -> PathBuf {
        self.path.join("queue")
    }

    pub fn retry_queue_dir(&self) -> PathBuf {
        self.path.join("retry_queue")
    }

    pub fn running_dir(&self) -> PathBuf {
        self.path.join("running")
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::new("./queue")
    }
}
