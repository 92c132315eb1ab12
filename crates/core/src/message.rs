//! Messages exchanged between workers and the coordinator.

use crate::{Address, WorkerId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Contract violations detected while decoding or routing a message.
///
/// None of these reach user code. The router logs them and drops the
/// offending message.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown message type `{0}`")]
    UnknownMessageType(String),

    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("wire address {0} does not name the coordinator or a worker")]
    InvalidAddress(u64),

    #[error("{kind} from {from} carries no correlation id")]
    MissingCorrelationId { kind: MessageKind, from: Address },

    #[error("{kind} from {from} is not accepted here")]
    Unexpected { kind: MessageKind, from: Address },

    #[error("no worker {0} in this run")]
    UnknownWorker(WorkerId),

    #[error("worker {0} already reported a terminal message")]
    DuplicateTerminal(WorkerId),

    #[error("reply {0} matches no pending request")]
    UnmatchedReply(CorrelationId),
}

/// The closed set of message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    /// Console output line from a worker.
    ConsoleLog,
    /// Console error line from a worker.
    ConsoleError,
    /// One row appended to the coordinator's CSV buffer.
    CsvRow,
    /// Request to render a plot.
    PlotRequest,
    /// Terminal message: the worker's return value.
    WorkerResult,
    /// Terminal message: the worker raised an error.
    WorkerError,
    /// Blocking request for a coordinator-held value.
    ValueRequest,
    /// Coordinator answer to a [`MessageKind::ValueRequest`].
    ValueReply,
}

impl MessageKind {
    pub const ALL: [MessageKind; 8] = [
        MessageKind::ConsoleLog,
        MessageKind::ConsoleError,
        MessageKind::CsvRow,
        MessageKind::PlotRequest,
        MessageKind::WorkerResult,
        MessageKind::WorkerError,
        MessageKind::ValueRequest,
        MessageKind::ValueReply,
    ];

    /// The wire name of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::ConsoleLog => "CONSOLE_LOG",
            MessageKind::ConsoleError => "CONSOLE_ERROR",
            MessageKind::CsvRow => "CSV_ROW",
            MessageKind::PlotRequest => "PLOT_REQUEST",
            MessageKind::WorkerResult => "WORKER_RESULT",
            MessageKind::WorkerError => "WORKER_ERROR",
            MessageKind::ValueRequest => "VALUE_REQUEST",
            MessageKind::ValueReply => "VALUE_REPLY",
        }
    }

    /// Check if this message ends a worker's lifetime.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageKind::WorkerResult | MessageKind::WorkerError)
    }

    /// Check if this message expects no reply.
    pub fn is_fire_and_forget(&self) -> bool {
        matches!(
            self,
            MessageKind::ConsoleLog
                | MessageKind::ConsoleError
                | MessageKind::CsvRow
                | MessageKind::PlotRequest
        )
    }
}

impl FromStr for MessageKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownMessageType(s.to_string()))
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque token pairing a value request with its reply.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Build the id for the `seq`-th request issued by `worker`.
    ///
    /// Ids are unique per worker; the router only ever delivers a reply back
    /// to the worker that asked, so they need not be globally unique.
    pub fn new(worker: WorkerId, seq: u64) -> Self {
        Self(format!("w{}-{}", worker.0, seq))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CorrelationId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Payload of a [`MessageKind::WorkerError`] message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    pub message: String,
}

impl ErrorDescriptor {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Recover a descriptor from an arbitrary payload.
    ///
    /// Payloads that are not shaped like a descriptor are kept verbatim as
    /// their JSON text, so a failure is never lost.
    pub fn from_payload(payload: &Value) -> Self {
        match serde_json::from_value::<ErrorDescriptor>(payload.clone()) {
            Ok(descriptor) => descriptor,
            Err(_) => match payload {
                Value::String(s) => Self::new(s.clone()),
                other => Self::new(other.to_string()),
            },
        }
    }
}

/// A message between a worker and the coordinator.
///
/// Serializes to the wire shape
/// `{ "type": string, "source": integer, "correlationId"?: string, "payload": any }`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub source: Address,
    #[serde(rename = "correlationId", skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
    pub payload: Value,
}

/// Wire shape with the type left as a string, so unknown types can be told
/// apart from malformed frames.
#[derive(Deserialize)]
struct RawMessage {
    #[serde(rename = "type")]
    kind: String,
    source: Address,
    #[serde(rename = "correlationId", default)]
    correlation_id: Option<CorrelationId>,
    #[serde(default)]
    payload: Value,
}

impl Message {
    pub fn new(kind: MessageKind, source: Address, payload: Value) -> Self {
        Self {
            kind,
            source,
            correlation_id: None,
            payload,
        }
    }

    pub fn console_log(source: WorkerId, args: Value) -> Self {
        Self::new(MessageKind::ConsoleLog, source.into(), args)
    }

    pub fn console_error(source: WorkerId, args: Value) -> Self {
        Self::new(MessageKind::ConsoleError, source.into(), args)
    }

    pub fn csv_row(source: WorkerId, row: Vec<Value>) -> Self {
        Self::new(MessageKind::CsvRow, source.into(), Value::Array(row))
    }

    pub fn plot_request(source: WorkerId, spec: Value) -> Self {
        Self::new(MessageKind::PlotRequest, source.into(), spec)
    }

    pub fn worker_result(source: WorkerId, value: Value) -> Self {
        Self::new(MessageKind::WorkerResult, source.into(), value)
    }

    pub fn worker_error(source: WorkerId, error: &ErrorDescriptor) -> Self {
        let payload = serde_json::json!({ "message": error.message });
        Self::new(MessageKind::WorkerError, source.into(), payload)
    }

    pub fn value_request(source: WorkerId, correlation_id: CorrelationId, payload: Value) -> Self {
        Self {
            kind: MessageKind::ValueRequest,
            source: source.into(),
            correlation_id: Some(correlation_id),
            payload,
        }
    }

    /// Reply from the coordinator to an earlier value request.
    pub fn value_reply(correlation_id: CorrelationId, payload: Value) -> Self {
        Self {
            kind: MessageKind::ValueReply,
            source: Address::Coordinator,
            correlation_id: Some(correlation_id),
            payload,
        }
    }

    /// Encode as a JSON wire frame.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a JSON wire frame.
    pub fn from_json(frame: &str) -> Result<Self, ProtocolError> {
        let raw: RawMessage = serde_json::from_str(frame)?;
        let kind = raw.kind.parse::<MessageKind>()?;
        Ok(Self {
            kind,
            source: raw.source,
            correlation_id: raw.correlation_id,
            payload: raw.payload,
        })
    }

    /// The correlation id, or an error naming this message if it has none.
    pub fn require_correlation_id(&self) -> Result<&CorrelationId, ProtocolError> {
        self.correlation_id
            .as_ref()
            .ok_or(ProtocolError::MissingCorrelationId {
                kind: self.kind,
                from: self.source,
            })
    }
}
