//! Configuration types for the runner.

use elea_parallel::PoolConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a demo run.
#[derive(Clone, Debug)]
pub struct RunnerConfig {
    /// Number of worker threads (`run_thread` count).
    pub threads: usize,

    /// Concurrency limit. `None` runs every thread at once.
    pub limit: Option<usize>,

    /// Fibonacci index computed by thread 0; thread `i` computes `fib_base + i`.
    pub fib_base: u64,

    /// Append result rows to this CSV file. `None` keeps them in memory.
    pub csv_path: Option<PathBuf>,

    /// Prefix console lines with the originating thread.
    pub tag_console_output: bool,

    /// Bound on how long a worker waits for a value reply.
    pub request_timeout: Option<Duration>,
}

impl RunnerConfig {
    /// Create a new runner configuration.
    pub fn new(threads: usize) -> Self {
        Self {
            threads,
            limit: None,
            fib_base: 20,
            csv_path: None,
            tag_console_output: true,
            request_timeout: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_fib_base(mut self, n: u64) -> Self {
        self.fib_base = n;
        self
    }

    pub fn with_csv_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.csv_path = Some(path.into());
        self
    }

    pub fn with_console_tags(mut self, enabled: bool) -> Self {
        self.tag_console_output = enabled;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Convert to the pool configuration.
    pub fn to_pool_config(&self) -> PoolConfig {
        let config = PoolConfig::new().with_console_tags(self.tag_console_output);
        match self.request_timeout {
            Some(timeout) => config.with_request_timeout(timeout),
            None => config,
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::new(elea_parallel::hardware_concurrency())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_config_follows_runner_config() {
        let config = RunnerConfig::new(4)
            .with_console_tags(false)
            .with_request_timeout(Duration::from_millis(250));

        let pool = config.to_pool_config();
        assert!(!pool.tag_console_output);
        assert_eq!(pool.request_timeout, Some(Duration::from_millis(250)));
        assert_eq!(RunnerConfig::new(4).to_pool_config().request_timeout, None);
    }

    #[test]
    fn test_default_uses_available_parallelism() {
        let config = RunnerConfig::default();
        assert!(config.threads >= 1);
        assert_eq!(config.limit, None);
    }
}
