//! Coordinator-held state of a single run.
//!
//! A [`RunContext`] is created when a run starts and consumed when every
//! worker has reached a terminal state. It is only ever touched by the
//! coordinator loop, one message at a time, so none of it needs locking.

use crate::io::CsvRow;
use crate::scheduler::WorkerExecutionError;
use elea_core::{Message, ProtocolError, WorkerId};
use serde_json::Value;
use std::fmt;
use tokio::sync::mpsc;

/// Lifecycle of a worker: `Pending -> Running -> {Completed | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl WorkerStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkerStatus::Completed | WorkerStatus::Failed)
    }
}

/// Coordinator-side view of one worker.
#[derive(Debug)]
struct WorkerHandle {
    status: WorkerStatus,
    /// Coordinator to worker direction. Dropped once the worker is terminal,
    /// which also stops the worker's inbox task.
    channel: Option<mpsc::UnboundedSender<Message>>,
}

/// Why a task produced no value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// The statement block returned an error (`WORKER_ERROR`).
    Raised(String),
    /// The worker exited without a terminal message. Carries the panic
    /// message when there was one.
    MissingTerminalMessage(Option<String>),
}

/// A failed task, attributed by index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub index: WorkerId,
    pub kind: FailureKind,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            FailureKind::Raised(message) => write!(f, "thread {}: {}", self.index, message),
            FailureKind::MissingTerminalMessage(Some(panic)) => write!(
                f,
                "thread {}: exited without a result ({})",
                self.index, panic
            ),
            FailureKind::MissingTerminalMessage(None) => {
                write!(f, "thread {}: exited without a result", self.index)
            }
        }
    }
}

/// Per-task return values, ordered by task index.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultArray {
    slots: Vec<Option<Value>>,
}

impl ResultArray {
    pub fn with_len(len: usize) -> Self {
        Self {
            slots: vec![None; len],
        }
    }

    /// Write slot `index`. Returns false if the slot was already written.
    fn fill(&mut self, index: usize, value: Value) -> bool {
        match self.slots.get_mut(index) {
            Some(slot) if slot.is_none() => {
                *slot = Some(value);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The value of task `index`, if it produced one.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Check whether every task produced a value.
    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Slots in task order; `None` for tasks that failed.
    pub fn iter(&self) -> impl Iterator<Item = Option<&Value>> {
        self.slots.iter().map(Option::as_ref)
    }

    /// Values in task order, with `null` in place of missing slots.
    pub fn into_values(self) -> Vec<Value> {
        self.slots
            .into_iter()
            .map(|slot| slot.unwrap_or(Value::Null))
            .collect()
    }

    /// The array as the value of a `run_thread` expression.
    pub fn into_json(self) -> Value {
        Value::Array(self.into_values())
    }
}

/// Coordinator-held state of a single run.
#[derive(Debug)]
pub struct RunContext {
    handles: Vec<WorkerHandle>,
    results: ResultArray,
    failures: Vec<TaskFailure>,
    csv_rows: Vec<CsvRow>,
}

impl RunContext {
    /// Create the state for `thread_count` pending workers.
    pub fn new(thread_count: usize) -> Self {
        let handles = (0..thread_count)
            .map(|_| WorkerHandle {
                status: WorkerStatus::Pending,
                channel: None,
            })
            .collect();

        Self {
            handles,
            results: ResultArray::with_len(thread_count),
            failures: Vec::new(),
            csv_rows: Vec::new(),
        }
    }

    pub fn thread_count(&self) -> usize {
        self.handles.len()
    }

    pub fn status(&self, id: WorkerId) -> Option<WorkerStatus> {
        self.handles.get(id.index()).map(|h| h.status)
    }

    /// Mark a pending worker as running and attach its inbound channel.
    pub fn attach(
        &mut self,
        id: WorkerId,
        channel: mpsc::UnboundedSender<Message>,
    ) -> Result<(), ProtocolError> {
        let handle = self.handle_mut(id)?;
        if handle.status != WorkerStatus::Pending {
            return Err(ProtocolError::UnknownWorker(id));
        }
        handle.status = WorkerStatus::Running;
        handle.channel = Some(channel);
        Ok(())
    }

    /// Record a `WORKER_RESULT`.
    pub fn complete(&mut self, id: WorkerId, value: Value) -> Result<(), ProtocolError> {
        self.terminate(id, WorkerStatus::Completed)?;
        if !self.results.fill(id.index(), value) {
            return Err(ProtocolError::DuplicateTerminal(id));
        }
        Ok(())
    }

    /// Record a failure (`WORKER_ERROR` or a missing terminal message).
    pub fn fail(&mut self, id: WorkerId, kind: FailureKind) -> Result<(), ProtocolError> {
        self.terminate(id, WorkerStatus::Failed)?;
        self.failures.push(TaskFailure { index: id, kind });
        Ok(())
    }

    /// The worker unit has exited.
    ///
    /// A worker still running at this point never sent a terminal message.
    pub fn retire(&mut self, id: WorkerId, panic: Option<String>) -> Result<(), ProtocolError> {
        if self.status(id) == Some(WorkerStatus::Running) {
            tracing::warn!(worker = id.0, "Worker exited without a terminal message");
            self.fail(id, FailureKind::MissingTerminalMessage(panic))?;
        }
        self.handle_mut(id)?.channel = None;
        Ok(())
    }

    /// Send a message to a running worker.
    pub fn send_to(&self, id: WorkerId, message: Message) -> Result<(), ProtocolError> {
        let handle = self
            .handles
            .get(id.index())
            .ok_or(ProtocolError::UnknownWorker(id))?;

        match &handle.channel {
            Some(channel) if channel.send(message).is_ok() => {}
            _ => tracing::debug!(worker = id.0, "Worker no longer listening, reply dropped"),
        }
        Ok(())
    }

    pub(crate) fn push_csv_row(&mut self, row: CsvRow) {
        self.csv_rows.push(row);
    }

    /// Rows appended so far, in arrival order.
    pub fn csv_rows(&self) -> &[CsvRow] {
        &self.csv_rows
    }

    pub(crate) fn take_csv_rows(&mut self) -> Vec<CsvRow> {
        std::mem::take(&mut self.csv_rows)
    }

    /// Check whether every worker has reached a terminal state.
    pub fn all_terminal(&self) -> bool {
        self.handles.iter().all(|h| h.status.is_terminal())
    }

    /// Tear down the run and produce its value.
    pub(crate) fn finish(mut self) -> Result<ResultArray, WorkerExecutionError> {
        // Anything not terminal by now never reported back.
        for index in 0..self.handles.len() {
            let id = WorkerId(index as u32);
            if !self.handles[index].status.is_terminal() {
                self.handles[index].status = WorkerStatus::Failed;
                self.failures.push(TaskFailure {
                    index: id,
                    kind: FailureKind::MissingTerminalMessage(None),
                });
            }
        }

        if self.failures.is_empty() {
            Ok(self.results)
        } else {
            self.failures.sort_by_key(|f| f.index);
            Err(WorkerExecutionError::new(self.failures, self.results))
        }
    }

    fn terminate(&mut self, id: WorkerId, status: WorkerStatus) -> Result<(), ProtocolError> {
        let handle = self.handle_mut(id)?;
        match handle.status {
            WorkerStatus::Running => {
                handle.status = status;
                handle.channel = None;
                Ok(())
            }
            WorkerStatus::Pending => Err(ProtocolError::UnknownWorker(id)),
            WorkerStatus::Completed | WorkerStatus::Failed => {
                Err(ProtocolError::DuplicateTerminal(id))
            }
        }
    }

    fn handle_mut(&mut self, id: WorkerId) -> Result<&mut WorkerHandle, ProtocolError> {
        self.handles
            .get_mut(id.index())
            .ok_or(ProtocolError::UnknownWorker(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn running(thread_count: usize) -> RunContext {
        let mut ctx = RunContext::new(thread_count);
        for i in 0..thread_count {
            let (tx, _rx) = mpsc::unbounded_channel();
            ctx.attach(WorkerId(i as u32), tx).unwrap();
        }
        ctx
    }

    #[test]
    fn test_results_follow_index_not_completion_order() {
        let mut ctx = running(3);
        ctx.complete(WorkerId(2), json!("c")).unwrap();
        ctx.complete(WorkerId(0), json!("a")).unwrap();
        ctx.complete(WorkerId(1), json!("b")).unwrap();

        assert!(ctx.all_terminal());
        let results = ctx.finish().unwrap();
        assert_eq!(results.into_values(), vec![json!("a"), json!("b"), json!("c")]);
    }

    #[test]
    fn test_slot_written_at_most_once() {
        let mut ctx = running(1);
        ctx.complete(WorkerId(0), json!(1)).unwrap();

        assert!(matches!(
            ctx.complete(WorkerId(0), json!(2)),
            Err(ProtocolError::DuplicateTerminal(_))
        ));
        assert!(matches!(
            ctx.fail(WorkerId(0), FailureKind::Raised("late".into())),
            Err(ProtocolError::DuplicateTerminal(_))
        ));
        assert_eq!(ctx.finish().unwrap().get(0), Some(&json!(1)));
    }

    #[test]
    fn test_pending_worker_cannot_terminate() {
        let mut ctx = RunContext::new(2);
        assert!(matches!(
            ctx.complete(WorkerId(1), json!(1)),
            Err(ProtocolError::UnknownWorker(_))
        ));
        assert!(matches!(
            ctx.complete(WorkerId(5), json!(1)),
            Err(ProtocolError::UnknownWorker(_))
        ));
        assert_eq!(ctx.status(WorkerId(1)), Some(WorkerStatus::Pending));
    }

    #[test]
    fn test_retire_without_terminal_message_fails_worker() {
        let mut ctx = running(2);
        ctx.complete(WorkerId(0), json!(0)).unwrap();
        ctx.retire(WorkerId(0), None).unwrap();
        ctx.retire(WorkerId(1), Some("boom".into())).unwrap();

        assert_eq!(ctx.status(WorkerId(0)), Some(WorkerStatus::Completed));
        assert_eq!(ctx.status(WorkerId(1)), Some(WorkerStatus::Failed));

        let err = ctx.finish().unwrap_err();
        assert_eq!(
            err.failures(),
            &[TaskFailure {
                index: WorkerId(1),
                kind: FailureKind::MissingTerminalMessage(Some("boom".into())),
            }]
        );
        assert_eq!(err.partial_results().get(0), Some(&json!(0)));
        assert_eq!(err.partial_results().get(1), None);
    }

    #[test]
    fn test_finish_reports_workers_that_never_ran() {
        let ctx = RunContext::new(1);
        let err = ctx.finish().unwrap_err();
        assert_eq!(err.failed_indices(), vec![WorkerId(0)]);
    }

    #[test]
    fn test_failure_display_names_thread() {
        let failure = TaskFailure {
            index: WorkerId(3),
            kind: FailureKind::Raised("bad input".into()),
        };
        assert_eq!(failure.to_string(), "thread 3: bad input");
    }
}
