//! Worker entry runtime.
//!
//! Every worker unit runs one [`Task`] through [`WorkerRuntime`]:
//!
//! 1. Imports the task's variables into a fresh scope, in chain order
//! 2. Executes the statement block with a [`WorkerContext`]
//! 3. Sends exactly one terminal message (`WORKER_RESULT` or `WORKER_ERROR`)
//!
//! User logic never touches coordinator state. Console output, CSV rows and
//! plot requests become fire-and-forget messages; value requests block the
//! worker until the coordinator replies.

use crate::correlator::Correlator;
use crate::task::Task;
use elea_core::{ErrorDescriptor, Message, WorkerId};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

/// Errors from a blocking value request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("coordinator is no longer accepting messages")]
    CoordinatorGone,
    #[error("no reply to request {id} within {timeout:?}")]
    Timeout { id: String, timeout: Duration },
}

/// Everything a statement block can reach from inside a worker.
pub struct WorkerContext {
    id: WorkerId,
    scope: HashMap<String, Value>,
    outbox: mpsc::UnboundedSender<Message>,
    correlator: Arc<Correlator>,
    runtime: Handle,
    request_timeout: Option<Duration>,
}

impl WorkerContext {
    pub(crate) fn new(
        id: WorkerId,
        outbox: mpsc::UnboundedSender<Message>,
        correlator: Arc<Correlator>,
        runtime: Handle,
        request_timeout: Option<Duration>,
    ) -> Self {
        Self {
            id,
            scope: HashMap::new(),
            outbox,
            correlator,
            runtime,
            request_timeout,
        }
    }

    /// The `thread_num` block: this worker's task index.
    pub fn thread_num(&self) -> u32 {
        self.id.0
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// The `thread_hardware_concurrency` block.
    pub fn hardware_concurrency(&self) -> usize {
        crate::hardware_concurrency()
    }

    /// Look up a variable in the worker scope.
    pub fn var(&self, name: &str) -> Option<&Value> {
        self.scope.get(name)
    }

    /// Assign a variable in the worker scope, shadowing any import.
    pub fn set_var(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.scope.insert(name.into(), value.into());
    }

    /// Print to the coordinator's console.
    ///
    /// An array payload is treated as an argument list; anything else is a
    /// single argument.
    pub fn console_log(&self, args: impl Into<Value>) {
        self.send(Message::console_log(self.id, args.into()));
    }

    /// Print to the coordinator's error console.
    pub fn console_error(&self, args: impl Into<Value>) {
        self.send(Message::console_error(self.id, args.into()));
    }

    /// Append a row to the coordinator's CSV buffer.
    pub fn save_in_csv(&self, row: Vec<Value>) {
        self.send(Message::csv_row(self.id, row));
    }

    /// Ask the coordinator to plot `spec`.
    pub fn plot(&self, spec: Value) {
        self.send(Message::plot_request(self.id, spec));
    }

    /// Ask the coordinator for a value and block until it answers.
    pub fn request(&self, payload: Value) -> Result<Value, RequestError> {
        let (id, reply) = self.correlator.register();

        if self
            .outbox
            .send(Message::value_request(self.id, id.clone(), payload))
            .is_err()
        {
            self.correlator.cancel(&id);
            return Err(RequestError::CoordinatorGone);
        }

        let outcome = match self.request_timeout {
            None => self
                .runtime
                .block_on(reply)
                .map_err(|_| RequestError::CoordinatorGone),
            Some(timeout) => match self.runtime.block_on(tokio::time::timeout(timeout, reply)) {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(_)) => Err(RequestError::CoordinatorGone),
                Err(_) => Err(RequestError::Timeout {
                    id: id.to_string(),
                    timeout,
                }),
            },
        };

        if outcome.is_err() {
            self.correlator.cancel(&id);
        }
        outcome
    }

    fn send(&self, message: Message) {
        if self.outbox.send(message).is_err() {
            tracing::debug!(worker = self.id.0, "Coordinator gone, message dropped");
        }
    }
}

/// Runs one task inside a worker unit.
pub(crate) struct WorkerRuntime {
    task: Task,
    ctx: WorkerContext,
}

impl WorkerRuntime {
    pub(crate) fn new(task: Task, mut ctx: WorkerContext) -> Self {
        for (name, value) in task.imports().iter() {
            ctx.set_var(name, value.clone());
        }
        Self { task, ctx }
    }

    /// Execute the task and report its outcome.
    ///
    /// Sends exactly one terminal message unless the block panics, in which
    /// case the worker vanishes silently and the scheduler records the
    /// missing terminal message.
    pub(crate) fn run(mut self) {
        let id = self.ctx.id;
        let terminal = match self.task.block().execute(&mut self.ctx) {
            Ok(value) => Message::worker_result(id, value),
            Err(fault) => {
                tracing::debug!(worker = id.0, error = %fault, "Worker raised");
                Message::worker_error(id, &ErrorDescriptor::new(fault.message()))
            }
        };

        if self.ctx.outbox.send(terminal).is_err() {
            tracing::warn!(worker = id.0, "Coordinator gone before terminal message");
        }
    }
}
