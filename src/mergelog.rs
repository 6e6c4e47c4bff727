//! Merge audit log types.
//!
//! Every executed merge appends exactly one log entry, written before any
//! destructive step. The entry carries a full snapshot of the absorbed
//! entity, so an interrupted merge can be replayed and a bad merge can be
//! reconstructed by an operator.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::{CanonicalEntity, EntityId};
use crate::matching::MatchId;

/// Unique identifier for a merge log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MergeLogId(Uuid);

impl MergeLogId {
    /// Creates a new random log entry ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MergeLogId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MergeLogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One append-only audit record per executed merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeLogEntry {
    /// Unique identifier for this entry.
    pub id: MergeLogId,

    /// The surviving entity.
    pub kept: EntityId,

    /// The entity absorbed and deleted by the merge.
    pub absorbed: EntityId,

    /// Full pre-merge snapshot of the absorbed entity, for undo/replay.
    pub snapshot: CanonicalEntity,

    /// The match that triggered this merge, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_id: Option<MatchId>,

    /// Who (or what) ran the merge.
    pub actor: String,

    /// When the entry was appended.
    pub merged_at: DateTime<Utc>,
}

impl MergeLogEntry {
    /// Creates a log entry for a merge about to execute.
    #[must_use]
    pub fn new(
        kept: EntityId,
        snapshot: CanonicalEntity,
        match_id: Option<MatchId>,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            id: MergeLogId::new(),
            kept,
            absorbed: snapshot.id,
            snapshot,
            match_id,
            actor: actor.into(),
            merged_at: Utc::now(),
        }
    }
}

impl PartialEq for MergeLogEntry {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MergeLogEntry {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_records_absorbed_id_from_snapshot() {
        let kept = EntityId::new();
        let mut absorbed = CanonicalEntity::new();
        absorbed.email = Some("x@y.com".to_string());
        let absorbed_id = absorbed.id;

        let entry = MergeLogEntry::new(kept, absorbed, None, "reviewer-7");
        assert_eq!(entry.kept, kept);
        assert_eq!(entry.absorbed, absorbed_id);
        assert_eq!(entry.snapshot.email.as_deref(), Some("x@y.com"));
        assert_eq!(entry.actor, "reviewer-7");
    }

    #[test]
    fn test_entry_serialization_roundtrip() {
        let entry = MergeLogEntry::new(
            EntityId::new(),
            CanonicalEntity::new(),
            Some(MatchId::new()),
            "policy",
        );
        let json = serde_json::to_string(&entry).unwrap();
        let back: MergeLogEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(entry.id, back.id);
        assert_eq!(entry.absorbed, back.absorbed);
        assert_eq!(entry.match_id, back.match_id);
    }
}
