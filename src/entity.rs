//! Canonical entity types and merge field rules.
//!
//! A canonical entity is the single durable record representing one
//! real-world person or organization. Identifiers from source systems
//! attach to it, and a merge collapses two canonical entities into one
//! without losing data: fields backfill, sets union, counters sum, and
//! lineage is appended so history stays reconstructible from the survivor.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Globally unique, stable entity identifier.
///
/// Once created, an `EntityId` never changes. An id stops resolving only
/// when its entity is absorbed by a merge, at which point the surviving
/// entity's `merged_from` lineage records it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(Uuid);

impl EntityId {
    /// Creates a new random entity ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an entity ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EntityId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<EntityId> for Uuid {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

/// The durable "truth" record for one real-world actor.
///
/// Canonical fields are nullable; when non-null they reflect source data
/// from at least one surviving identifier. Entities are deleted only as
/// the losing side of a merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalEntity {
    /// Globally unique identifier.
    pub id: EntityId,

    /// Canonical email address, if any source supplied one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Canonical phone number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,

    /// Canonical company name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,

    /// Relationship-strength score in [0, 1].
    pub relationship_score: f32,

    /// Project-code associations, set semantics (no duplicates).
    #[serde(default)]
    pub project_codes: Vec<String>,

    /// Number of merges this entity has absorbed over its lifetime.
    pub merge_count: u64,

    /// Every entity id absorbed into this one, in merge order.
    #[serde(default)]
    pub merged_from: Vec<EntityId>,

    /// When this entity last absorbed another.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_merged_at: Option<DateTime<Utc>>,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl CanonicalEntity {
    /// Creates a fresh entity with no canonical fields set.
    #[must_use]
    pub fn new() -> Self {
        Self::with_id(EntityId::new())
    }

    /// Creates a fresh entity with a specific ID (migration, testing).
    #[must_use]
    pub fn with_id(id: EntityId) -> Self {
        let now = Utc::now();
        Self {
            id,
            email: None,
            phone: None,
            company_name: None,
            relationship_score: 0.0,
            project_codes: Vec::new(),
            merge_count: 0,
            merged_from: Vec::new(),
            last_merged_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Adds a project-code association, preserving set semantics.
    pub fn add_project_code(&mut self, code: impl Into<String>) {
        let code = code.into();
        let code = code.trim();
        if code.is_empty() {
            return;
        }
        if !self
            .project_codes
            .iter()
            .any(|c| c.eq_ignore_ascii_case(code))
        {
            self.project_codes.push(code.to_string());
            self.touch();
        }
    }

    /// Backfills canonical fields from `other`: a field is taken only when
    /// this entity's value is currently null. Returns the names of the
    /// fields that changed.
    ///
    /// Re-running against an already-backfilled entity changes nothing.
    pub fn backfill_from(&mut self, other: &Self) -> Vec<&'static str> {
        let mut updated = Vec::new();

        if self.email.is_none() {
            if let Some(email) = other.email.as_ref() {
                self.email = Some(email.clone());
                updated.push("email");
            }
        }
        if self.phone.is_none() {
            if let Some(phone) = other.phone.as_ref() {
                self.phone = Some(phone.clone());
                updated.push("phone");
            }
        }
        if self.company_name.is_none() {
            if let Some(name) = other.company_name.as_ref() {
                self.company_name = Some(name.clone());
                updated.push("company_name");
            }
        }

        if !updated.is_empty() {
            self.touch();
        }
        updated
    }

    /// Folds `other` into this entity per the merge field rules: canonical
    /// fields backfill (survivor wins ties), project codes union, merge
    /// counters sum, relationship score takes the max, and the lineage
    /// records both sides' histories plus `other` itself.
    ///
    /// Returns the canonical fields updated by the backfill step.
    pub fn absorb(&mut self, other: &Self) -> Vec<&'static str> {
        let updated = self.backfill_from(other);

        for code in &other.project_codes {
            self.add_project_code(code.clone());
        }

        self.relationship_score = self
            .relationship_score
            .max(other.relationship_score)
            .clamp(0.0, 1.0);

        // merge_count counts absorbed entities: both sides' histories
        // plus the one being absorbed right now.
        self.merge_count = self
            .merge_count
            .saturating_add(other.merge_count)
            .saturating_add(1);

        self.merged_from.extend(other.merged_from.iter().copied());
        self.merged_from.push(other.id);

        self.last_merged_at = Some(Utc::now());
        self.touch();
        updated
    }

    /// Updates the `updated_at` timestamp.
    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl Default for CanonicalEntity {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for CanonicalEntity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for CanonicalEntity {}

impl std::hash::Hash for CanonicalEntity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_creation() {
        let id1 = EntityId::new();
        let id2 = EntityId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_entity_id_display() {
        let id = EntityId::new();
        let display = format!("{id}");
        assert!(display.contains('-')); // UUID format
    }

    #[test]
    fn test_entity_creation() {
        let entity = CanonicalEntity::new();
        assert!(entity.email.is_none());
        assert_eq!(entity.merge_count, 0);
        assert!(entity.merged_from.is_empty());
        assert!(entity.last_merged_at.is_none());
    }

    #[test]
    fn test_add_project_code_dedupes() {
        let mut entity = CanonicalEntity::new();
        entity.add_project_code("ALPHA");
        entity.add_project_code("alpha");
        entity.add_project_code("  ");
        entity.add_project_code("BETA");

        assert_eq!(entity.project_codes, vec!["ALPHA", "BETA"]);
    }

    #[test]
    fn test_backfill_first_non_null_wins() {
        let mut keep = CanonicalEntity::new();
        keep.email = Some("keep@example.com".to_string());

        let mut other = CanonicalEntity::new();
        other.email = Some("other@example.com".to_string());
        other.phone = Some("555-1234".to_string());

        let updated = keep.backfill_from(&other);
        assert_eq!(updated, vec!["phone"]);
        // Surviving entity wins the tie on email.
        assert_eq!(keep.email.as_deref(), Some("keep@example.com"));
        assert_eq!(keep.phone.as_deref(), Some("555-1234"));
    }

    #[test]
    fn test_backfill_is_idempotent() {
        let mut keep = CanonicalEntity::new();
        let mut other = CanonicalEntity::new();
        other.email = Some("x@y.com".to_string());
        other.company_name = Some("Acme".to_string());

        let first = keep.backfill_from(&other);
        assert_eq!(first.len(), 2);

        let again = keep.backfill_from(&other);
        assert!(again.is_empty());
        assert_eq!(keep.email.as_deref(), Some("x@y.com"));
    }

    #[test]
    fn test_absorb_unions_sums_and_records_lineage() {
        let mut keep = CanonicalEntity::new();
        keep.add_project_code("P1");
        keep.relationship_score = 0.4;
        keep.merge_count = 1;
        let earlier = EntityId::new();
        keep.merged_from.push(earlier);

        let mut other = CanonicalEntity::new();
        other.add_project_code("P1");
        other.add_project_code("P2");
        other.relationship_score = 0.7;
        other.merge_count = 2;
        let ancestor = EntityId::new();
        other.merged_from.push(ancestor);
        let other_id = other.id;

        keep.absorb(&other);

        assert_eq!(keep.project_codes, vec!["P1", "P2"]);
        assert!((keep.relationship_score - 0.7).abs() < f32::EPSILON);
        assert_eq!(keep.merge_count, 4); // 1 + 2 + the absorbed entity
        assert_eq!(keep.merged_from, vec![earlier, ancestor, other_id]);
        assert!(keep.last_merged_at.is_some());
    }

    #[test]
    fn test_entity_equality_is_by_id() {
        let id = EntityId::new();
        let a = CanonicalEntity::with_id(id);
        let mut b = CanonicalEntity::with_id(id);
        b.email = Some("different@example.com".to_string());
        assert_eq!(a, b);
    }

    #[test]
    fn test_entity_serialization() {
        let mut entity = CanonicalEntity::new();
        entity.email = Some("x@y.com".to_string());
        let json = serde_json::to_string(&entity).unwrap();
        let deserialized: CanonicalEntity = serde_json::from_str(&json).unwrap();
        assert_eq!(entity.id, deserialized.id);
        assert_eq!(entity.email, deserialized.email);
    }
}
