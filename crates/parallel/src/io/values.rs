//! Answers to worker value requests.

use elea_core::WorkerId;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

/// Computes or looks up the value a worker asked for.
pub trait ValueSource: Send + Sync {
    fn value_for(&self, source: WorkerId, request: &Value) -> Value;
}

impl<F> ValueSource for F
where
    F: Fn(WorkerId, &Value) -> Value + Send + Sync,
{
    fn value_for(&self, source: WorkerId, request: &Value) -> Value {
        self(source, request)
    }
}

/// Coordinator-held variables plus a few built-in queries.
///
/// Understands requests shaped as:
///
/// - `{"op": "get", "name": "x"}`: the stored value of `x`, or `null`
/// - `{"op": "now"}`: milliseconds since the UNIX epoch
/// - `{"op": "hardware_concurrency"}`: the host's available parallelism
///
/// Anything else is answered with `null`.
#[derive(Debug, Default)]
pub struct SharedValues {
    values: Mutex<HashMap<String, Value>>,
}

impl SharedValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}

impl ValueSource for SharedValues {
    fn value_for(&self, source: WorkerId, request: &Value) -> Value {
        match request.get("op").and_then(Value::as_str) {
            Some("get") => request
                .get("name")
                .and_then(Value::as_str)
                .and_then(|name| self.get(name))
                .unwrap_or(Value::Null),
            Some("now") => {
                let millis = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or(0);
                json!(millis)
            }
            Some("hardware_concurrency") => json!(crate::hardware_concurrency()),
            _ => {
                tracing::warn!(worker = source.0, %request, "Unrecognised value request");
                Value::Null
            }
        }
    }
}
