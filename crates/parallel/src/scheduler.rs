//! Thread-pool scheduler.
//!
//! Manages the lifecycle of one `run_thread` / `run_thread_limited` call:
//! 1. Builds one task per requested thread
//! 2. Spawns workers up to the concurrency limit, queueing the rest (FIFO)
//! 3. Services worker messages as they arrive, one at a time
//! 4. Admits the next queued task each time a worker exits
//! 5. Flushes the CSV buffer and returns the results in task order

use crate::config::PoolConfig;
use crate::context::{ResultArray, RunContext, TaskFailure};
use crate::correlator::Correlator;
use crate::io::{ConsoleSink, CsvSink, IoProxy, PlotSink, ValueSource};
use crate::router::{MessageRouter, WorkerInbox};
use crate::stats::{PoolStatsHandle, SharedStats};
use crate::task::{ImportedVariables, StatementBlock, Task, WorkerFault};
use crate::worker::{WorkerContext, WorkerRuntime};
use elea_core::{Message, WorkerId};
use serde_json::Value;
use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Errors from a threaded run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("thread count must be at least 1")]
    NoThreads,
    #[error("concurrency limit must be at least 1")]
    NoConcurrency,
    #[error(transparent)]
    WorkerExecution(#[from] WorkerExecutionError),
    #[error("worker unit could not be joined: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl RunError {
    /// The per-task failures, if the run failed because workers did.
    pub fn worker_execution(&self) -> Option<&WorkerExecutionError> {
        match self {
            RunError::WorkerExecution(err) => Some(err),
            _ => None,
        }
    }
}

/// One or more workers failed.
///
/// Sibling workers were not cancelled, so the values of every successful
/// task are still available through [`partial_results`](Self::partial_results).
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerExecutionError {
    failures: Vec<TaskFailure>,
    partial: ResultArray,
}

impl WorkerExecutionError {
    pub(crate) fn new(failures: Vec<TaskFailure>, partial: ResultArray) -> Self {
        Self { failures, partial }
    }

    /// Failures ordered by task index.
    pub fn failures(&self) -> &[TaskFailure] {
        &self.failures
    }

    pub fn failed_indices(&self) -> Vec<WorkerId> {
        self.failures.iter().map(|f| f.index).collect()
    }

    /// Results of the tasks that succeeded; failed slots are empty.
    pub fn partial_results(&self) -> &ResultArray {
        &self.partial
    }
}

impl fmt::Display for WorkerExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} threads failed",
            self.failures.len(),
            self.partial.len()
        )?;
        for failure in &self.failures {
            write!(f, "; {}", failure)?;
        }
        Ok(())
    }
}

impl std::error::Error for WorkerExecutionError {}

/// How many workers may run at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcurrencyLimit {
    /// Every task starts immediately (`run_thread`).
    Unlimited,
    /// At most this many workers run at once (`run_thread_limited`).
    Bounded(NonZeroUsize),
}

impl ConcurrencyLimit {
    pub fn bounded(limit: usize) -> Result<Self, RunError> {
        NonZeroUsize::new(limit)
            .map(ConcurrencyLimit::Bounded)
            .ok_or(RunError::NoConcurrency)
    }

    /// Number of worker slots for a run of `thread_count` tasks.
    fn slots(self, thread_count: usize) -> usize {
        match self {
            ConcurrencyLimit::Unlimited => thread_count,
            ConcurrencyLimit::Bounded(limit) => limit.get().min(thread_count),
        }
    }
}

impl fmt::Display for ConcurrencyLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConcurrencyLimit::Unlimited => write!(f, "unlimited"),
            ConcurrencyLimit::Bounded(limit) => write!(f, "{}", limit),
        }
    }
}

/// Everything needed to start a run.
#[derive(Clone)]
pub struct RunRequest {
    thread_count: usize,
    limit: ConcurrencyLimit,
    block: Arc<dyn StatementBlock>,
    imports: ImportedVariables,
}

impl RunRequest {
    /// Run `block` on `thread_count` workers with no concurrency limit.
    pub fn new<F>(thread_count: usize, block: F) -> Self
    where
        F: Fn(&mut WorkerContext) -> Result<Value, WorkerFault> + Send + Sync + 'static,
    {
        Self::from_block(thread_count, Arc::new(block))
    }

    /// Like [`RunRequest::new`], for any [`StatementBlock`] implementation.
    pub fn from_block(thread_count: usize, block: Arc<dyn StatementBlock>) -> Self {
        Self {
            thread_count,
            limit: ConcurrencyLimit::Unlimited,
            block,
            imports: ImportedVariables::new(),
        }
    }

    pub fn with_limit(mut self, limit: ConcurrencyLimit) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_imports(mut self, imports: ImportedVariables) -> Self {
        self.imports = imports;
        self
    }

    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    pub fn limit(&self) -> ConcurrencyLimit {
        self.limit
    }
}

/// What a worker unit reports when it exits.
struct WorkerExit {
    id: WorkerId,
    /// Panic message, if the statement block panicked.
    panic: Option<String>,
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

/// Runs statement blocks on pools of worker units.
///
/// The pool keeps its sinks and statistics across runs; everything that
/// belongs to a single run lives in a [`RunContext`] created at the start of
/// [`run`](Self::run) and torn down at its end.
pub struct ThreadPool {
    config: PoolConfig,
    router: MessageRouter,
    stats: Arc<SharedStats>,
}

impl ThreadPool {
    /// Create a pool with stdio console, in-memory CSV and plot notices.
    pub fn new(config: PoolConfig) -> Self {
        let stats = SharedStats::new();
        let io = IoProxy::new(config.tag_console_output);

        Self {
            config,
            router: MessageRouter::new(io, Arc::clone(&stats)),
            stats,
        }
    }

    pub fn with_console(mut self, console: Arc<dyn ConsoleSink>) -> Self {
        self.router.io_mut().set_console(console);
        self
    }

    pub fn with_csv_sink(mut self, sink: impl CsvSink + 'static) -> Self {
        self.router.io_mut().set_csv_sink(Box::new(sink));
        self
    }

    pub fn with_plot_sink(mut self, sink: Arc<dyn PlotSink>) -> Self {
        self.router.io_mut().set_plot_sink(sink);
        self
    }

    pub fn with_value_source(mut self, source: Arc<dyn ValueSource>) -> Self {
        self.router.io_mut().set_value_source(source);
        self
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Get a handle for reading statistics while runs are in flight.
    pub fn stats_handle(&self) -> PoolStatsHandle {
        PoolStatsHandle::new(Arc::clone(&self.stats))
    }

    /// The `run_thread` block.
    pub async fn run_thread<F>(
        &mut self,
        thread_count: usize,
        imports: ImportedVariables,
        block: F,
    ) -> Result<ResultArray, RunError>
    where
        F: Fn(&mut WorkerContext) -> Result<Value, WorkerFault> + Send + Sync + 'static,
    {
        self.run(RunRequest::new(thread_count, block).with_imports(imports))
            .await
    }

    /// The `run_thread_limited` block.
    pub async fn run_thread_limited<F>(
        &mut self,
        thread_count: usize,
        limit: usize,
        imports: ImportedVariables,
        block: F,
    ) -> Result<ResultArray, RunError>
    where
        F: Fn(&mut WorkerContext) -> Result<Value, WorkerFault> + Send + Sync + 'static,
    {
        let limit = ConcurrencyLimit::bounded(limit)?;
        self.run(
            RunRequest::new(thread_count, block)
                .with_limit(limit)
                .with_imports(imports),
        )
        .await
    }

    /// Run a request to completion.
    ///
    /// Returns once every worker has reached a terminal state. Fails with
    /// [`RunError::WorkerExecution`] if any task failed.
    pub async fn run(&mut self, request: RunRequest) -> Result<ResultArray, RunError> {
        let RunRequest {
            thread_count,
            limit,
            block,
            imports,
        } = request;

        if thread_count == 0 {
            return Err(RunError::NoThreads);
        }
        let slots = limit.slots(thread_count);

        info!(thread_count, %limit, "Starting threaded run");

        let imports = Arc::new(imports);
        let mut queue: VecDeque<Task> = Task::batch(thread_count, &block, &imports).into();
        let mut ctx = RunContext::new(thread_count);
        let (outbox, mut inbox) = mpsc::unbounded_channel();
        let runtime = Handle::current();
        let mut workers = JoinSet::new();

        while workers.len() < slots {
            let Some(task) = queue.pop_front() else { break };
            self.spawn_worker(task, &mut ctx, &mut workers, &outbox, &runtime);
        }

        while !workers.is_empty() {
            tokio::select! {
                biased;

                Some(message) = inbox.recv() => {
                    self.router.route_logged(&mut ctx, message);
                }

                Some(joined) = workers.join_next() => {
                    let exit = joined?;

                    // A worker's messages are queued before it exits.
                    while let Ok(message) = inbox.try_recv() {
                        self.router.route_logged(&mut ctx, message);
                    }

                    self.stats.worker_exited();
                    debug!(worker = exit.id.0, "Worker exited");
                    if let Err(err) = ctx.retire(exit.id, exit.panic) {
                        warn!(worker = exit.id.0, error = %err, "Failed to retire worker");
                    }

                    if let Some(task) = queue.pop_front() {
                        self.spawn_worker(task, &mut ctx, &mut workers, &outbox, &runtime);
                    }
                }
            }
        }

        let rows = ctx.take_csv_rows();
        if let Err(err) = self.router.io_mut().flush_csv(&rows) {
            tracing::error!(rows = rows.len(), error = %err, "Failed to flush CSV rows");
        }
        self.stats.record_run();

        match ctx.finish() {
            Ok(results) => {
                info!(thread_count, "Threaded run complete");
                Ok(results)
            }
            Err(err) => {
                warn!(
                    thread_count,
                    failed = err.failures().len(),
                    "Threaded run finished with failures"
                );
                Err(err.into())
            }
        }
    }

    /// Start a worker unit for `task`.
    fn spawn_worker(
        &self,
        task: Task,
        ctx: &mut RunContext,
        workers: &mut JoinSet<WorkerExit>,
        outbox: &mpsc::UnboundedSender<Message>,
        runtime: &Handle,
    ) {
        let id = task.index();
        let correlator = Arc::new(Correlator::new(id));
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        if let Err(err) = ctx.attach(id, inbound_tx) {
            warn!(worker = id.0, error = %err, "Refusing to start worker");
            return;
        }

        runtime.spawn(WorkerInbox::new(id, Arc::clone(&correlator)).run(inbound_rx));

        let worker_ctx = WorkerContext::new(
            id,
            outbox.clone(),
            correlator,
            runtime.clone(),
            self.config.request_timeout,
        );
        let worker = WorkerRuntime::new(task, worker_ctx);

        workers.spawn_blocking_on(
            move || {
                let panic = panic::catch_unwind(AssertUnwindSafe(move || worker.run()))
                    .err()
                    .map(panic_message);
                WorkerExit { id, panic }
            },
            runtime,
        );

        self.stats.worker_started();
        debug!(worker = id.0, "Worker spawned");
    }
}

impl Default for ThreadPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_limit_slots() {
        assert_eq!(ConcurrencyLimit::Unlimited.slots(6), 6);
        assert_eq!(ConcurrencyLimit::bounded(2).unwrap().slots(6), 2);
        assert_eq!(ConcurrencyLimit::bounded(10).unwrap().slots(3), 3);
        assert!(matches!(
            ConcurrencyLimit::bounded(0),
            Err(RunError::NoConcurrency)
        ));
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_message(Box::new(7u8)), "worker panicked");
    }

    #[tokio::test]
    async fn test_zero_threads_rejected() {
        let mut pool = ThreadPool::default();
        let outcome = pool
            .run_thread(0, ImportedVariables::new(), |_| Ok(Value::Null))
            .await;
        assert!(matches!(outcome, Err(RunError::NoThreads)));
        assert_eq!(pool.stats_handle().snapshot().workers_spawned, 0);
    }

    #[tokio::test]
    async fn test_zero_limit_rejected() {
        let mut pool = ThreadPool::default();
        let outcome = pool
            .run_thread_limited(3, 0, ImportedVariables::new(), |_| Ok(Value::Null))
            .await;
        assert!(matches!(outcome, Err(RunError::NoConcurrency)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_single_thread_run() {
        let mut pool = ThreadPool::default();
        let results = pool
            .run_thread(1, ImportedVariables::new(), |ctx| {
                Ok(json!(ctx.thread_num() + 100))
            })
            .await
            .unwrap();

        assert_eq!(results.into_values(), vec![json!(100)]);
        let stats = pool.stats_handle().snapshot();
        assert_eq!(stats.runs_completed, 1);
        assert_eq!(stats.running, 0);
    }

    #[test]
    fn test_execution_error_display() {
        let err = WorkerExecutionError::new(
            vec![TaskFailure {
                index: WorkerId(1),
                kind: crate::context::FailureKind::Raised("nope".into()),
            }],
            ResultArray::with_len(3),
        );
        assert_eq!(err.to_string(), "1 of 3 threads failed; thread 1: nope");
    }
}
