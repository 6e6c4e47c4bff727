//! Identifier facts and their provenance.
//!
//! An identifier binds one canonical entity to one (source system, kind,
//! value) tuple, e.g. (CRM, email, "a@b.com"). Provenance matters here the
//! same way it does for any audit trail: two independent sources agreeing
//! on a value is stronger evidence than one source repeating itself.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::EntityId;
use crate::normalize;

/// Unique identifier for an identifier row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentifierId(Uuid);

impl IdentifierId {
    /// Creates a new random identifier ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for IdentifierId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for IdentifierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The external system an identifier was reported by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceSystem {
    /// CRM contact records.
    Crm,
    /// Accounting counterparties.
    Accounting,
    /// Communication logs (mail, calls).
    Communications,
    /// Any other registered feed.
    Custom(String),
}

impl fmt::Display for SourceSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Crm => write!(f, "crm"),
            Self::Accounting => write!(f, "accounting"),
            Self::Communications => write!(f, "communications"),
            Self::Custom(name) => write!(f, "custom:{name}"),
        }
    }
}

/// What an identifier value represents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierKind {
    /// An email address.
    Email,
    /// A phone number.
    Phone,
    /// An organization's name.
    CompanyName,
    /// A source-specific key (external record id, tax number, ...).
    Custom(String),
}

impl IdentifierKind {
    /// Normalizes a raw value for this kind. The result is the blocking
    /// key for candidate generation and the value component of the
    /// store's uniqueness tuple.
    #[must_use]
    pub fn normalize(&self, raw: &str) -> String {
        match self {
            Self::Email => normalize::email(raw),
            Self::Phone => normalize::phone(raw),
            Self::CompanyName => normalize::company(raw),
            Self::Custom(_) => normalize::generic(raw),
        }
    }
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Email => write!(f, "email"),
            Self::Phone => write!(f, "phone"),
            Self::CompanyName => write!(f, "company_name"),
            Self::Custom(name) => write!(f, "custom:{name}"),
        }
    }
}

/// The uniqueness tuple: one (source, kind, normalized value) triple may
/// belong to at most one entity across the whole store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentifierKey {
    /// Reporting system.
    pub source: SourceSystem,
    /// Value kind.
    pub kind: IdentifierKind,
    /// Normalized value, not the raw one.
    pub normalized: String,
}

impl fmt::Display for IdentifierKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.source, self.kind, self.normalized)
    }
}

/// A single fact binding a canonical entity to a source-system tuple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identifier {
    /// Unique row id.
    pub id: IdentifierId,

    /// The entity this identifier currently belongs to. Reassigned only
    /// during a merge.
    pub entity_id: EntityId,

    /// Reporting system.
    pub source: SourceSystem,
    /// Value kind.
    pub kind: IdentifierKind,

    /// The value as reported by the source system.
    pub value: String,

    /// Derived normalized form; fixed at construction.
    pub normalized: String,

    /// When the fact was first recorded.
    pub created_at: DateTime<Utc>,
}

impl Identifier {
    /// Creates a new identifier, deriving the normalized value.
    #[must_use]
    pub fn new(
        entity_id: EntityId,
        source: SourceSystem,
        kind: IdentifierKind,
        value: impl Into<String>,
    ) -> Self {
        let value = value.into();
        let normalized = kind.normalize(&value);
        Self {
            id: IdentifierId::new(),
            entity_id,
            source,
            kind,
            value,
            normalized,
            created_at: Utc::now(),
        }
    }

    /// The store-level uniqueness tuple for this identifier.
    #[must_use]
    pub fn key(&self) -> IdentifierKey {
        IdentifierKey {
            source: self.source.clone(),
            kind: self.kind.clone(),
            normalized: self.normalized.clone(),
        }
    }
}

impl PartialEq for Identifier {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Identifier {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_normalizes_on_construction() {
        let ident = Identifier::new(
            EntityId::new(),
            SourceSystem::Crm,
            IdentifierKind::Email,
            "  Bob@Example.COM ",
        );
        assert_eq!(ident.value, "  Bob@Example.COM ");
        assert_eq!(ident.normalized, "bob@example.com");
    }

    #[test]
    fn test_key_uses_normalized_value() {
        let a = Identifier::new(
            EntityId::new(),
            SourceSystem::Crm,
            IdentifierKind::Phone,
            "+1 (555) 123-4567",
        );
        let b = Identifier::new(
            EntityId::new(),
            SourceSystem::Crm,
            IdentifierKind::Phone,
            "555 123 4567",
        );
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn test_keys_differ_across_sources() {
        let a = Identifier::new(
            EntityId::new(),
            SourceSystem::Crm,
            IdentifierKind::Email,
            "a@b.com",
        );
        let b = Identifier::new(
            EntityId::new(),
            SourceSystem::Accounting,
            IdentifierKind::Email,
            "a@b.com",
        );
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn test_source_system_display() {
        assert_eq!(format!("{}", SourceSystem::Crm), "crm");
        assert_eq!(
            format!("{}", SourceSystem::Custom("helpdesk".to_string())),
            "custom:helpdesk"
        );
    }

    #[test]
    fn test_key_display_is_slash_separated() {
        let ident = Identifier::new(
            EntityId::new(),
            SourceSystem::Accounting,
            IdentifierKind::CompanyName,
            "Acme, Inc.",
        );
        assert_eq!(format!("{}", ident.key()), "accounting/company_name/acme");
    }

    #[test]
    fn test_identifier_serialization() {
        let ident = Identifier::new(
            EntityId::new(),
            SourceSystem::Communications,
            IdentifierKind::Email,
            "a@b.com",
        );
        let json = serde_json::to_string(&ident).unwrap();
        let back: Identifier = serde_json::from_str(&json).unwrap();
        assert_eq!(ident.id, back.id);
        assert_eq!(ident.normalized, back.normalized);
    }
}
