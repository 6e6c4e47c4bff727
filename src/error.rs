//! Error types for the resolution and merge engine.
//!
//! All errors are strongly typed using thiserror. The taxonomy mirrors the
//! engine's retry contract: validation and not-found errors are surfaced to
//! the caller verbatim and never retried; lock contention and interrupted
//! merges are the only retryable conditions.

use thiserror::Error;

use crate::entity::EntityId;
use crate::matching::{MatchId, MatchStatus};
use crate::mergelog::MergeLogId;
use crate::storage::StorageError;

/// Validation errors that occur during input validation.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Identifier value cannot be empty")]
    EmptyIdentifierValue,

    #[error("'{value}' is not a plausible email address")]
    MalformedEmail {
        value: String,
    },

    #[error("Cannot merge entity {id} into itself")]
    SelfMerge {
        id: EntityId,
    },
}

/// Lookup failures for the engine's durable records.
#[derive(Debug, Error)]
pub enum NotFoundError {
    #[error("Entity not found: {0}")]
    Entity(EntityId),

    #[error("Match not found: {0}")]
    Match(MatchId),

    #[error("Merge log entry not found: {0}")]
    MergeLogEntry(MergeLogId),
}

/// Top-level error type for the engine.
///
/// This enum encompasses all error conditions a caller can observe when
/// driving the resolution and merge engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Not found: {0}")]
    NotFound(#[from] NotFoundError),

    /// An identifier tuple collision outside a merge context. Inside a
    /// merge this is the expected dedup signal and is handled, not raised.
    #[error("Identifier {key} already belongs to entity {owner}")]
    Conflict {
        key: String,
        owner: EntityId,
    },

    /// Another merge currently holds a lock on one of the named entities.
    /// Safe to retry with backoff.
    #[error("Entity {entity_id} is locked by a concurrent merge")]
    ConcurrentMerge {
        entity_id: EntityId,
    },

    /// A merge failed after its log entry was written. The operation is
    /// resumable via the recorded log id; it is not a total failure.
    #[error("Merge interrupted after log entry {log_id} was written: {reason}")]
    PartialMerge {
        log_id: MergeLogId,
        reason: String,
    },

    /// A decision was attempted against a match in a terminal state.
    #[error("Match {match_id} is already {status}; decision rejected")]
    InvalidState {
        match_id: MatchId,
        status: MatchStatus,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl EngineError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a not-found error.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns true if this error is retryable.
    ///
    /// Only lock contention and interrupted merges should be retried;
    /// everything else reflects caller input or a persistent fault.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrentMerge { .. } | Self::PartialMerge { .. }
        )
    }

    /// HTTP status code for the transport-neutral API contract.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::InvalidState { .. } => 400,
            Self::NotFound(_) => 404,
            Self::Conflict { .. } | Self::ConcurrentMerge { .. } => 409,
            Self::PartialMerge { .. } | Self::Storage(_) | Self::Internal { .. } => 500,
        }
    }
}

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
