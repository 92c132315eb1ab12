//! Core types for the Elea threaded runtime.
//!
//! This crate provides the vocabulary shared by workers and the coordinator:
//!
//! - [`Address`]: Who sent a message (the coordinator or a specific worker)
//! - [`Message`]: The unit exchanged between a worker and the coordinator
//! - [`MessageKind`]: The closed set of message types the router understands
//! - [`ProtocolError`]: Contract violations detected while decoding or routing
//!
//! # Addressing
//!
//! Workers are numbered from zero by task index, so the coordinator cannot
//! share that namespace. Addresses are a sum type in memory and use a shifted
//! integer on the wire:
//!
//! ```text
//! Address::Coordinator   <->  0
//! Address::Worker(0)     <->  1
//! Address::Worker(n)     <->  n + 1
//! ```

mod message;

pub use message::{CorrelationId, ErrorDescriptor, Message, MessageKind, ProtocolError};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a worker unit.
///
/// Equal to the task index, the value of `thread_num` inside the worker, and
/// the slot the worker's result lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub u32);

impl WorkerId {
    /// The worker index as a `usize`, for slot lookups.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sender or recipient of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u64", try_from = "u64")]
pub enum Address {
    /// The single coordinating control flow.
    Coordinator,
    /// A worker unit, identified by its task index.
    Worker(WorkerId),
}

impl Address {
    /// Wire value reserved for the coordinator.
    pub const COORDINATOR_WIRE_ID: u64 = 0;

    /// Encode as the integer used in the `source` field of wire messages.
    pub fn to_wire(self) -> u64 {
        match self {
            Address::Coordinator => Self::COORDINATOR_WIRE_ID,
            Address::Worker(id) => u64::from(id.0) + 1,
        }
    }

    /// Decode the integer used in the `source` field of wire messages.
    pub fn from_wire(raw: u64) -> Result<Self, ProtocolError> {
        if raw == Self::COORDINATOR_WIRE_ID {
            return Ok(Address::Coordinator);
        }
        u32::try_from(raw - 1)
            .map(|index| Address::Worker(WorkerId(index)))
            .map_err(|_| ProtocolError::InvalidAddress(raw))
    }

    /// The worker id, if this address names a worker.
    pub fn worker(self) -> Option<WorkerId> {
        match self {
            Address::Coordinator => None,
            Address::Worker(id) => Some(id),
        }
    }

    pub fn is_coordinator(self) -> bool {
        matches!(self, Address::Coordinator)
    }
}

impl From<WorkerId> for Address {
    fn from(id: WorkerId) -> Self {
        Address::Worker(id)
    }
}

impl From<Address> for u64 {
    fn from(address: Address) -> Self {
        address.to_wire()
    }
}

impl TryFrom<u64> for Address {
    type Error = ProtocolError;

    fn try_from(raw: u64) -> Result<Self, Self::Error> {
        Address::from_wire(raw)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Coordinator => write!(f, "coordinator"),
            Address::Worker(id) => write!(f, "worker {}", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinator_and_worker_zero_are_distinct_on_the_wire() {
        assert_eq!(Address::Coordinator.to_wire(), 0);
        assert_eq!(Address::Worker(WorkerId(0)).to_wire(), 1);
        assert_ne!(
            Address::Coordinator.to_wire(),
            Address::Worker(WorkerId(0)).to_wire()
        );
    }

    #[test]
    fn test_wire_address_decoding() {
        assert_eq!(Address::from_wire(0).unwrap(), Address::Coordinator);
        assert_eq!(
            Address::from_wire(8).unwrap(),
            Address::Worker(WorkerId(7))
        );
        assert!(matches!(
            Address::from_wire(u64::MAX),
            Err(ProtocolError::InvalidAddress(u64::MAX))
        ));
    }

    #[test]
    fn test_address_accessors() {
        assert!(Address::Coordinator.is_coordinator());
        assert_eq!(Address::Coordinator.worker(), None);
        assert_eq!(Address::from(WorkerId(3)).worker(), Some(WorkerId(3)));
        assert_eq!(Address::Worker(WorkerId(3)).to_string(), "worker 3");
    }
}
