//! Tasks and the executable units workers run.

use crate::worker::{RequestError, WorkerContext};
use elea_core::WorkerId;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Error raised by user logic inside a worker.
///
/// Becomes the descriptor of the worker's `WORKER_ERROR` message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct WorkerFault {
    message: String,
}

impl WorkerFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<RequestError> for WorkerFault {
    fn from(err: RequestError) -> Self {
        Self::new(err.to_string())
    }
}

impl From<serde_json::Error> for WorkerFault {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// The statements of a `run_thread` block together with its return
/// expression.
///
/// Implemented for every `Fn(&mut WorkerContext) -> Result<Value, WorkerFault>`.
/// Returning `Value::Null` stands for a block without a return expression.
pub trait StatementBlock: Send + Sync + 'static {
    fn execute(&self, ctx: &mut WorkerContext) -> Result<Value, WorkerFault>;
}

impl<F> StatementBlock for F
where
    F: Fn(&mut WorkerContext) -> Result<Value, WorkerFault> + Send + Sync + 'static,
{
    fn execute(&self, ctx: &mut WorkerContext) -> Result<Value, WorkerFault> {
        self(ctx)
    }
}

/// Variables imported into every worker, in block chain order.
///
/// Later imports shadow earlier imports of the same name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportedVariables {
    entries: Vec<(String, Value)>,
}

impl ImportedVariables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an import to the chain.
    pub fn import(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Imports in chain order, shadowed entries included.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<N: Into<String>, V: Into<Value>> FromIterator<(N, V)> for ImportedVariables {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        }
    }
}

/// One unit of work: a worker index, the block to run, and its imports.
#[derive(Clone)]
pub struct Task {
    index: WorkerId,
    block: Arc<dyn StatementBlock>,
    imports: Arc<ImportedVariables>,
}

impl Task {
    pub fn new(
        index: WorkerId,
        block: Arc<dyn StatementBlock>,
        imports: Arc<ImportedVariables>,
    ) -> Self {
        Self {
            index,
            block,
            imports,
        }
    }

    /// Build the tasks `0..thread_count` sharing one block and one import set.
    pub fn batch(
        thread_count: usize,
        block: &Arc<dyn StatementBlock>,
        imports: &Arc<ImportedVariables>,
    ) -> Vec<Task> {
        (0..thread_count)
            .map(|i| Task::new(WorkerId(i as u32), Arc::clone(block), Arc::clone(imports)))
            .collect()
    }

    pub fn index(&self) -> WorkerId {
        self.index
    }

    pub fn block(&self) -> &dyn StatementBlock {
        self.block.as_ref()
    }

    pub fn imports(&self) -> &ImportedVariables {
        &self.imports
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("index", &self.index)
            .field("imports", &self.imports)
            .finish_non_exhaustive()
    }
}
