//! Pool statistics shared between the scheduler and observers.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Atomic counters updated by the scheduler and router.
#[derive(Debug, Default)]
pub(crate) struct SharedStats {
    runs_completed: AtomicU64,
    workers_spawned: AtomicU64,
    messages_routed: AtomicU64,
    protocol_violations: AtomicU64,
    running: AtomicUsize,
    peak_running: AtomicUsize,
}

impl SharedStats {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn record_run(&self) {
        self.runs_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_routed(&self) {
        self.messages_routed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_violation(&self) {
        self.protocol_violations.fetch_add(1, Ordering::Relaxed);
    }

    /// A worker entered the running state.
    pub(crate) fn worker_started(&self) {
        self.workers_spawned.fetch_add(1, Ordering::Relaxed);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_running.fetch_max(now, Ordering::SeqCst);
    }

    /// A worker unit exited.
    pub(crate) fn worker_exited(&self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Snapshot of pool statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub runs_completed: u64,
    pub workers_spawned: u64,
    pub messages_routed: u64,
    pub protocol_violations: u64,
    /// Workers currently running.
    pub running: usize,
    /// Highest number of simultaneously running workers ever observed.
    pub peak_running: usize,
}

/// Handle for reading pool statistics from anywhere.
///
/// The pool is borrowed mutably while a run is in flight, so this handle
/// exposes the counters through a shared `Arc` instead.
#[derive(Debug, Clone)]
pub struct PoolStatsHandle {
    inner: Arc<SharedStats>,
}

impl PoolStatsHandle {
    pub(crate) fn new(inner: Arc<SharedStats>) -> Self {
        Self { inner }
    }

    /// Workers currently running.
    pub fn running(&self) -> usize {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously running workers observed so far.
    pub fn peak_running(&self) -> usize {
        self.inner.peak_running.load(Ordering::SeqCst)
    }

    /// Messages dropped because they violated the protocol.
    pub fn protocol_violations(&self) -> u64 {
        self.inner.protocol_violations.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all pool statistics.
    pub fn snapshot(&self) -> PoolStats {
        PoolStats {
            runs_completed: self.inner.runs_completed.load(Ordering::Relaxed),
            workers_spawned: self.inner.workers_spawned.load(Ordering::Relaxed),
            messages_routed: self.inner.messages_routed.load(Ordering::Relaxed),
            protocol_violations: self.protocol_violations(),
            running: self.running(),
            peak_running: self.peak_running(),
        }
    }
}
