//! Abstract storage traits for the resolution engine.
//!
//! These traits define the contract storage backends must implement.
//! In-memory backends cover embedded use and tests; the merge log
//! additionally has a file-backed implementation for durability.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::entity::{CanonicalEntity, EntityId};
use crate::identifier::{Identifier, IdentifierId, IdentifierKey, IdentifierKind, SourceSystem};
use crate::matching::{MatchId, MatchStatus, PotentialMatch};
use crate::mergelog::{MergeLogEntry, MergeLogId};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Entity not found.
    #[error("Entity not found: {0}")]
    EntityNotFound(EntityId),

    /// Match not found.
    #[error("Match not found: {0}")]
    MatchNotFound(MatchId),

    /// Identifier not found.
    #[error("Identifier not found: {0}")]
    IdentifierNotFound(IdentifierId),

    /// The identifier tuple already belongs to a different entity.
    #[error("Identifier tuple {key} already belongs to entity {owner}")]
    DuplicateTuple {
        key: IdentifierKey,
        owner: EntityId,
    },

    /// Key already exists.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),
}

/// Outcome of reassigning an entity's identifiers during a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReassignOutcome {
    /// Identifiers whose ownership moved to the target entity.
    pub moved: usize,
    /// Duplicate rows deleted because the target already held the tuple.
    pub deduplicated: usize,
}

/// Storage trait for canonical entities.
///
/// # Safety Considerations
/// - All mutations should be atomic where possible
/// - Implementations should handle concurrent access safely
pub trait EntityStore: Send + Sync {
    /// Insert a new entity. Returns error if ID already exists.
    fn insert(&self, entity: CanonicalEntity) -> Result<(), StorageError>;

    /// Get an entity by ID.
    fn get(&self, id: EntityId) -> Result<Option<CanonicalEntity>, StorageError>;

    /// Update an existing entity. Returns error if not found.
    fn update(&self, entity: CanonicalEntity) -> Result<(), StorageError>;

    /// Delete an entity by ID. Returns error if not found. Only the merge
    /// executor deletes entities, and only as the losing side of a merge.
    fn delete(&self, id: EntityId) -> Result<(), StorageError>;

    /// Number of stored entities.
    fn count(&self) -> Result<usize, StorageError>;
}

/// Storage trait for identifier facts.
///
/// The (source, kind, normalized value) tuple is unique across the whole
/// store. That index is the single source of truth for conflicts: callers
/// do not pre-check, they insert and handle `DuplicateTuple`.
pub trait IdentifierStore: Send + Sync {
    /// Insert a new identifier.
    ///
    /// # Errors
    /// - `DuplicateTuple` when the tuple belongs to a **different** entity.
    ///
    /// Inserting the same tuple for the same entity is an idempotent
    /// no-op returning the existing row's id.
    fn insert(&self, identifier: Identifier) -> Result<IdentifierId, StorageError>;

    /// Get an identifier by ID.
    fn get(&self, id: IdentifierId) -> Result<Option<Identifier>, StorageError>;

    /// Look up the owner of a tuple, if any.
    fn find_by_key(&self, key: &IdentifierKey) -> Result<Option<Identifier>, StorageError>;

    /// All identifiers currently owned by an entity.
    fn find_by_entity(&self, entity_id: EntityId) -> Result<Vec<Identifier>, StorageError>;

    /// Identifiers for an entity grouped by source system (display order).
    fn list_by_sources(
        &self,
        entity_id: EntityId,
    ) -> Result<BTreeMap<SourceSystem, Vec<Identifier>>, StorageError>;

    /// All identifiers sharing a normalized value within a kind, across
    /// every source system. This is the blocking index.
    fn find_by_normalized(
        &self,
        kind: &IdentifierKind,
        normalized: &str,
    ) -> Result<Vec<Identifier>, StorageError>;

    /// Every identifier in the store (full candidate scans).
    fn all(&self) -> Result<Vec<Identifier>, StorageError>;

    /// Move every identifier owned by `from` to `to`, atomically.
    ///
    /// Where `to` already holds an identical tuple, the duplicate row on
    /// the `from` side is deleted instead of moved. Idempotent: when
    /// `from` owns nothing the outcome is all zeros.
    fn reassign(&self, from: EntityId, to: EntityId) -> Result<ReassignOutcome, StorageError>;

    /// Delete an identifier by ID. Returns error if not found.
    fn delete(&self, id: IdentifierId) -> Result<(), StorageError>;

    /// Number of stored identifiers.
    fn count(&self) -> Result<usize, StorageError>;
}

/// Storage trait for potential matches.
pub trait MatchStore: Send + Sync {
    /// Insert a new match.
    ///
    /// # Errors
    /// - `DuplicateKey` when a non-rejected row for the same unordered
    ///   pair already exists.
    fn insert(&self, potential_match: PotentialMatch) -> Result<(), StorageError>;

    /// Get a match by ID.
    fn get(&self, id: MatchId) -> Result<Option<PotentialMatch>, StorageError>;

    /// Update an existing match. Returns error if not found.
    fn update(&self, potential_match: PotentialMatch) -> Result<(), StorageError>;

    /// Whether any row (including rejected) exists for the unordered pair.
    fn pair_exists(&self, a: EntityId, b: EntityId) -> Result<bool, StorageError>;

    /// Matches with the given status scoring at least `min_score`,
    /// ordered by score descending, truncated to `limit`.
    fn list(
        &self,
        status: MatchStatus,
        min_score: f32,
        limit: usize,
    ) -> Result<Vec<PotentialMatch>, StorageError>;

    /// Number of matches with the given status.
    fn count_by_status(&self, status: MatchStatus) -> Result<usize, StorageError>;

    /// Delete every match referencing the entity on either side,
    /// except the one named in `keep` (the row consumed by a merge,
    /// which stays as an audit record). Returns the number of rows
    /// removed.
    fn delete_by_entity(
        &self,
        entity_id: EntityId,
        keep: Option<MatchId>,
    ) -> Result<usize, StorageError>;
}

/// Storage trait for the append-only merge log.
pub trait MergeLog: Send + Sync {
    /// Append an entry. Must be durable before it returns, because
    /// destructive merge steps run only after a successful append.
    fn append(&self, entry: MergeLogEntry) -> Result<(), StorageError>;

    /// Get an entry by ID.
    fn get(&self, id: MergeLogId) -> Result<Option<MergeLogEntry>, StorageError>;

    /// All entries, in append order.
    fn entries(&self) -> Result<Vec<MergeLogEntry>, StorageError>;

    /// Entries where the entity appears as kept or absorbed.
    fn entries_for(&self, entity_id: EntityId) -> Result<Vec<MergeLogEntry>, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time test: ensure traits are object-safe
    fn _assert_entity_store_object_safe(_: &dyn EntityStore) {}
    fn _assert_identifier_store_object_safe(_: &dyn IdentifierStore) {}
    fn _assert_match_store_object_safe(_: &dyn MatchStore) {}
    fn _assert_merge_log_object_safe(_: &dyn MergeLog) {}

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::EntityNotFound(EntityId::new());
        assert!(err.to_string().contains("Entity not found"));

        let err = StorageError::BackendError("disk full".to_string());
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_duplicate_tuple_names_owner() {
        let owner = EntityId::new();
        let key = IdentifierKey {
            source: SourceSystem::Crm,
            kind: IdentifierKind::Email,
            normalized: "a@b.com".to_string(),
        };
        let err = StorageError::DuplicateTuple { key, owner };
        let msg = err.to_string();
        assert!(msg.contains("crm/email/a@b.com"));
        assert!(msg.contains(&owner.to_string()));
    }
}
