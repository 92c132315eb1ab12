//! Threaded runtime for Elea programs.
//!
//! A `run_thread` block executes the same statement block on several worker
//! units in parallel and collects one return value per worker, ordered by the
//! worker's index. `run_thread_limited` does the same with at most `limit`
//! workers running at once; the rest wait in a FIFO queue.
//!
//! Workers share no mutable state with the coordinator or with each other.
//! Everything a worker cannot do itself (print, append CSV rows, plot, read
//! coordinator-held values) travels as a message to the coordinator, which
//! performs it through an [`IoProxy`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                               ThreadPool                                    │
//! │                  (coordinator loop - caller's tokio task)                   │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                                                                             │
//! │   ┌───────────────┐  ┌───────────────┐  ┌───────────────┐   ┌────────────┐  │
//! │   │  Worker 0     │  │  Worker 1     │  │  Worker 2     │   │ FIFO queue │  │
//! │   │  (blocking)   │  │  (blocking)   │  │  (blocking)   │   │  (pending  │  │
//! │   │               │  │               │  │               │   │   tasks)   │  │
//! │   │ WorkerRuntime │  │ WorkerRuntime │  │ WorkerRuntime │   └────────────┘  │
//! │   │  Correlator   │  │  Correlator   │  │  Correlator   │                   │
//! │   │  WorkerInbox  │  │  WorkerInbox  │  │  WorkerInbox  │                   │
//! │   └───────┬───────┘  └───────┬───────┘  └───────┬───────┘                   │
//! │           │ ▲                │ ▲                │ ▲                         │
//! │           └─┼────────────────┼─┼────────────────┘ │                         │
//! │             │   worker msgs  │ │  VALUE_REPLY     │                         │
//! │             │       ┌────────▼─┴────────┐         │                         │
//! │             └───────┤  MessageRouter    ├─────────┘                         │
//! │                     │  (RunContext)     │                                   │
//! │                     └─────────┬─────────┘                                   │
//! │                               │                                             │
//! ├───────────────────────────────▼─────────────────────────────────────────────┤
//! │                IoProxy: console · CSV buffer · plot · values                │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Statement blocks are synchronous and run on tokio's blocking pool, so a
//! worker waiting for a value reply never stalls the coordinator loop.

mod config;
mod context;
mod correlator;
pub mod io;
mod router;
mod scheduler;
mod stats;
mod task;
mod worker;

pub use config::PoolConfig;
pub use context::{FailureKind, ResultArray, RunContext, TaskFailure, WorkerStatus};
pub use correlator::Correlator;
pub use router::{MessageRouter, WorkerInbox};
pub use scheduler::{ConcurrencyLimit, RunError, RunRequest, ThreadPool, WorkerExecutionError};
pub use stats::{PoolStats, PoolStatsHandle};
pub use task::{ImportedVariables, StatementBlock, Task, WorkerFault};
pub use worker::{RequestError, WorkerContext};

use std::num::NonZeroUsize;

/// Available parallelism of the host, falling back to 1 when unknown.
pub fn hardware_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}
