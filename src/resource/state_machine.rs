//! Resource state machine contract.
//!
//! A resource state machine is a deterministic function of
//! (current state, command) → (new state, result). Every replica applies the
//! same committed commands in the same order and reaches the same state.
//! Commands and results cross the consensus layer as opaque bytes tagged with
//! the resource type.

use crate::core::error::{TrellisError, TrellisResult};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Resource type tag carried by every command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    AtomicValue,
    MultiMap,
}

impl ResourceType {
    /// Whether commands are sharded across partitions by key.
    pub fn is_sharded(&self) -> bool {
        matches!(self, Self::MultiMap)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AtomicValue => "atomic_value",
            Self::MultiMap => "multi_map",
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResourceType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "atomic_value" => Ok(Self::AtomicValue),
            "multi_map" => Ok(Self::MultiMap),
            other => anyhow::bail!("unknown resource type: {}", other),
        }
    }
}

/// A command payload as stored in the replicated log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub resource_type: ResourceType,
    pub data: Bytes,
}

impl Command {
    pub fn new(resource_type: ResourceType, data: impl Into<Bytes>) -> Self {
        Self {
            resource_type,
            data: data.into(),
        }
    }

    /// Encode a typed operation into a command.
    pub fn encode<T: Serialize>(resource_type: ResourceType, op: &T) -> TrellisResult<Self> {
        Ok(Self::new(resource_type, encode(op)?))
    }
}

/// Deterministic state machine for one resource partition.
pub trait ResourceStateMachine: Send + 'static {
    /// Resource type this state machine accepts.
    fn resource_type(&self) -> ResourceType;

    /// Apply a committed command at `index` and return the encoded result.
    ///
    /// An error result is delivered to the submitting client; it must leave
    /// the state unchanged so replicas stay identical.
    fn apply(&mut self, index: u64, command: &[u8]) -> TrellisResult<Bytes>;

    /// Evaluate a read-only query against applied state.
    fn query(&self, query: &[u8]) -> TrellisResult<Bytes>;

    /// Serialize the full state.
    fn snapshot(&self) -> TrellisResult<Bytes>;

    /// Replace the state with a serialized snapshot.
    fn restore(&mut self, snapshot: &[u8]) -> TrellisResult<()>;
}

/// Encode a value with the crate's payload codec.
pub fn encode<T: Serialize>(value: &T) -> TrellisResult<Bytes> {
    Ok(Bytes::from(bincode::serialize(value)?))
}

/// Decode a client payload, mapping malformed input to InvalidCommand.
pub fn decode_command<T: DeserializeOwned>(bytes: &[u8]) -> TrellisResult<T> {
    bincode::deserialize(bytes)
        .map_err(|e| TrellisError::invalid_command(format!("malformed command: {}", e)))
}

/// Decode an internally produced payload (results, snapshots).
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> TrellisResult<T> {
    Ok(bincode::deserialize(bytes)?)
}
