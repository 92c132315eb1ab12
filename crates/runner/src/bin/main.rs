//! Elea threaded runner CLI
//!
//! Run the Fibonacci demo on a pool of worker threads.
//!
//! # Example
//!
//! ```bash
//! # Eight threads, all at once, fib(20)..fib(27)
//! elea-run --threads 8
//!
//! # At most two threads at a time, rows appended to a CSV file
//! elea-run -t 6 -l 2 --fib 30 --csv fib.csv
//! ```

use clap::Parser;
use elea_runner::{DemoRunner, RunnerConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Elea threaded runner
///
/// Runs the Fibonacci demo program through `run_thread`, or through
/// `run_thread_limited` when a limit is given, and prints the result array.
#[derive(Parser, Debug)]
#[command(name = "elea-run")]
#[command(version, about, long_about = None)]
struct Args {
    /// Number of worker threads (defaults to available parallelism)
    #[arg(short = 't', long)]
    threads: Option<usize>,

    /// Maximum number of threads running at once
    #[arg(short = 'l', long)]
    limit: Option<usize>,

    /// Fibonacci index computed by thread 0
    #[arg(long, default_value = "20")]
    fib: u64,

    /// Append result rows to this CSV file
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Print console lines without the `[thread N]` prefix
    #[arg(long)]
    no_tags: bool,

    /// Give up on a value request after this many milliseconds
    #[arg(long)]
    request_timeout_ms: Option<u64>,
}

impl Args {
    fn to_config(&self) -> RunnerConfig {
        let threads = self
            .threads
            .unwrap_or_else(elea_parallel::hardware_concurrency);
        let mut config = RunnerConfig::new(threads)
            .with_fib_base(self.fib)
            .with_console_tags(!self.no_tags);

        if let Some(limit) = self.limit {
            config = config.with_limit(limit);
        }
        if let Some(path) = &self.csv {
            config = config.with_csv_path(path);
        }
        if let Some(ms) = self.request_timeout_ms {
            config = config.with_request_timeout(Duration::from_millis(ms));
        }
        config
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,elea_runner=info,elea_parallel=info")),
        )
        .init();

    let args = Args::parse();
    let config = args.to_config();

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(err) => {
            error!(error = %err, "Failed to create tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    let mut runner = DemoRunner::new(config);
    match rt.block_on(runner.run()) {
        Ok(results) => {
            println!("{}", results.into_json());
            ExitCode::SUCCESS
        }
        Err(err) => {
            if let Some(failure) = err.worker_execution() {
                println!("{}", failure.partial_results().clone().into_json());
            }
            error!(error = %err, "Run failed");
            ExitCode::FAILURE
        }
    }
}
