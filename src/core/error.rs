//! Error types and adapter-specific mapping.
//!
//! Clients only ever observe the five error kinds defined here. Transient
//! election and replication failures (lost heartbeats, rejected appends,
//! denied votes) are absorbed by the consensus layer and only delay commit.

use crate::control::membership::MemberId;
use thiserror::Error;

/// Client-visible error conditions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrellisError {
    /// This replica does not lead the partition. Carries the known leader,
    /// if any, so callers can redirect.
    #[error("NotLeader: {}", leader_hint(.leader))]
    NotLeader { leader: Option<MemberId> },

    /// The outcome of the operation is unknown. The command may still commit.
    #[error("Timeout: operation outcome unknown")]
    Timeout,

    /// No quorum is reachable or the partition is not running.
    #[error("Unavailable: {message}")]
    Unavailable { message: String },

    /// Unexpected local failure (storage, serialization).
    #[error("InternalError: {message}")]
    Internal { message: String },

    /// The command failed semantic validation for its resource type.
    #[error("InvalidCommand: {message}")]
    InvalidCommand { message: String },
}

fn leader_hint(leader: &Option<MemberId>) -> String {
    match leader {
        Some(leader) => format!("leader is {}", leader),
        None => "leader unknown".to_string(),
    }
}

impl TrellisError {
    /// Create a NotLeader error.
    pub fn not_leader(leader: Option<MemberId>) -> Self {
        Self::NotLeader { leader }
    }

    /// Create an Unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Create an Internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create an InvalidCommand error.
    pub fn invalid_command(message: impl Into<String>) -> Self {
        Self::InvalidCommand {
            message: message.into(),
        }
    }

    /// Check if the caller may retry the operation.
    ///
    /// Timeouts are retriable only with idempotent commands, since the
    /// original command may still be applied.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::NotLeader { .. } | Self::Timeout | Self::Unavailable { .. }
        )
    }

    /// Leader hint carried by a NotLeader error.
    pub fn leader_hint(&self) -> Option<&MemberId> {
        match self {
            Self::NotLeader { leader } => leader.as_ref(),
            _ => None,
        }
    }
}

impl From<bincode::Error> for TrellisError {
    fn from(err: bincode::Error) -> Self {
        Self::internal(format!("serialization failure: {}", err))
    }
}

/// Result type using TrellisError.
pub type TrellisResult<T> = Result<T, TrellisError>;

// ============================================================================
// Adapter-specific error mapping
// ============================================================================

/// Trait for mapping TrellisError to adapter-specific error representations.
pub trait AdapterErrorMapping {
    /// The adapter-specific error type.
    type Error;

    /// Map a TrellisError to the adapter-specific error type.
    fn map_error(error: &TrellisError) -> Self::Error;
}

/// HTTP status mapping for REST-style adapters.
pub struct RestErrorMapping;

impl RestErrorMapping {
    /// Map a TrellisError to an HTTP status code.
    ///
    /// NotLeader maps to a temporary redirect when a leader is known.
    pub fn to_status_code(error: &TrellisError) -> u16 {
        match error {
            TrellisError::NotLeader { leader: Some(_) } => 307,
            TrellisError::NotLeader { leader: None } => 503,
            TrellisError::Timeout => 504,
            TrellisError::Unavailable { .. } => 503,
            TrellisError::InvalidCommand { .. } => 400,
            TrellisError::Internal { .. } => 500,
        }
    }
}

impl AdapterErrorMapping for RestErrorMapping {
    type Error = u16;

    fn map_error(error: &TrellisError) -> u16 {
        Self::to_status_code(error)
    }
}
