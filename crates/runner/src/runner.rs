//! Demo runner.
//!
//! Wires a [`ThreadPool`] to the sinks chosen in [`RunnerConfig`] and runs
//! the Fibonacci program through `run_thread` or `run_thread_limited`.

use crate::config::RunnerConfig;
use crate::demo;
use elea_parallel::io::{ConsoleSink, CsvFileSink};
use elea_parallel::{PoolStatsHandle, ResultArray, RunError, ThreadPool};
use std::sync::Arc;
use tracing::info;

/// Runs the demo program on a thread pool.
pub struct DemoRunner {
    config: RunnerConfig,
    pool: ThreadPool,
}

impl DemoRunner {
    /// Create a runner with stdio console output.
    pub fn new(config: RunnerConfig) -> Self {
        let mut pool = ThreadPool::new(config.to_pool_config());
        if let Some(path) = &config.csv_path {
            pool = pool.with_csv_sink(CsvFileSink::new(path).with_header(demo::CSV_HEADER));
        }
        Self { config, pool }
    }

    /// Send worker console output to `console` instead of stdio.
    pub fn with_console(mut self, console: Arc<dyn ConsoleSink>) -> Self {
        self.pool = self.pool.with_console(console);
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn stats(&self) -> PoolStatsHandle {
        self.pool.stats_handle()
    }

    /// Run the demo once.
    pub async fn run(&mut self) -> Result<ResultArray, RunError> {
        info!(
            threads = self.config.threads,
            limit = ?self.config.limit,
            fib_base = self.config.fib_base,
            csv = ?self.config.csv_path,
            "Starting Fibonacci demo"
        );

        let imports = demo::imports(self.config.fib_base);
        let results = match self.config.limit {
            Some(limit) => {
                self.pool
                    .run_thread_limited(self.config.threads, limit, imports, demo::fibonacci_block)
                    .await
            }
            None => {
                self.pool
                    .run_thread(self.config.threads, imports, demo::fibonacci_block)
                    .await
            }
        }?;

        let stats = self.pool.stats_handle().snapshot();
        info!(
            workers = stats.workers_spawned,
            peak_running = stats.peak_running,
            messages = stats.messages_routed,
            "Fibonacci demo complete"
        );
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use elea_parallel::io::RecordingConsole;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    const RUN_TIMEOUT: Duration = Duration::from_secs(10);

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_demo_results_and_csv() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fib.csv");

        let console = Arc::new(RecordingConsole::new());
        let mut runner = DemoRunner::new(
            RunnerConfig::new(4)
                .with_limit(2)
                .with_fib_base(10)
                .with_csv_path(&path),
        )
        .with_console(console.clone());

        let results = tokio::time::timeout(RUN_TIMEOUT, runner.run())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(results.into_json(), json!([55, 89, 144, 233]));
        assert_eq!(console.lines().len(), 4);
        assert!(runner.stats().peak_running() <= 2);

        let written = std::fs::read_to_string(&path).unwrap();
        let mut lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.remove(0), "thread,n,fib");
        lines.sort_unstable();
        assert_eq!(lines, vec!["0,10,55", "1,11,89", "2,12,144", "3,13,233"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_demo_overflow_fails_only_that_thread() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let mut runner = DemoRunner::new(RunnerConfig::new(3).with_fib_base(92))
            .with_console(Arc::new(RecordingConsole::new()));

        let err = tokio::time::timeout(RUN_TIMEOUT, runner.run())
            .await
            .unwrap()
            .unwrap_err();

        let failure = err.worker_execution().expect("worker execution error");
        assert_eq!(failure.failures().len(), 1);
        assert_eq!(failure.failures()[0].index.0, 2);
        assert_eq!(
            failure.partial_results().get(1),
            Some(&json!(12_200_160_415_121_876_738u64))
        );
    }
}
