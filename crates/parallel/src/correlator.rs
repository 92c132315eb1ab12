//! Request/reply correlation for blocking value requests.
//!
//! Each worker owns one correlator. A request registers a one-shot slot
//! under a fresh correlation id; the worker-side inbox resolves the slot when
//! a `VALUE_REPLY` carrying the same id arrives. Ids are never reused, so a
//! slot is a single-writer/single-reader rendezvous rather than a queue.

use elea_core::{CorrelationId, ProtocolError, WorkerId};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::oneshot;

/// Pending value requests of a single worker.
#[derive(Debug)]
pub struct Correlator {
    owner: WorkerId,
    next_seq: AtomicU64,
    pending: Mutex<HashMap<CorrelationId, oneshot::Sender<Value>>>,
}

impl Correlator {
    pub fn new(owner: WorkerId) -> Self {
        Self {
            owner,
            next_seq: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Open a pending request under a fresh correlation id.
    pub fn register(&self) -> (CorrelationId, oneshot::Receiver<Value>) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let id = CorrelationId::new(self.owner, seq);
        let (tx, rx) = oneshot::channel();
        self.lock().insert(id.clone(), tx);
        (id, rx)
    }

    /// Resolve the pending request with the given id.
    ///
    /// A reply whose id matches no open request leaves every other request
    /// untouched.
    pub fn resolve(&self, id: &CorrelationId, payload: Value) -> Result<(), ProtocolError> {
        let slot = self
            .lock()
            .remove(id)
            .ok_or_else(|| ProtocolError::UnmatchedReply(id.clone()))?;

        if slot.send(payload).is_err() {
            // Requester stopped waiting (timeout).
            tracing::debug!(worker = self.owner.0, %id, "Reply arrived after requester gave up");
        }
        Ok(())
    }

    /// Close a pending request without resolving it.
    pub fn cancel(&self, id: &CorrelationId) {
        self.lock().remove(id);
    }

    /// Number of requests still waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<CorrelationId, oneshot::Sender<Value>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
