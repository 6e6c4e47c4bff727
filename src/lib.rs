//! # Coalesce - Canonical Entity Resolution & Merge Engine
//!
//! Coalesce maintains one canonical record per real-world counterparty
//! while identifier observations (emails, phone numbers, company names)
//! stream in from multiple source systems. Entities that appear to be
//! the same are proposed for human review; an approved match can then
//! be merged, with the losing record's identifiers, canonical fields
//! and dependent references folded into the survivor.
//!
//! ## Core Concepts
//!
//! - **CanonicalEntity**: The single surviving record for a counterparty
//! - **Identifier**: One observation of an identifying value from one source system
//! - **PotentialMatch**: A scored proposal that two entities are the same
//! - **MergeLogEntry**: An append-only snapshot written before every merge
//!
//! ## Usage
//!
//! ```rust,ignore
//! use coalesce::{
//!     IdentifierKind, ReferenceRewriter, ResolutionEngine, SourceSystem,
//! };
//!
//! let engine = ResolutionEngine::in_memory(ReferenceRewriter::new());
//!
//! // Observations from two systems land on the same normalized email.
//! engine.upsert_identifier(SourceSystem::Crm, IdentifierKind::Email, "Jo@Acme.com", None)?;
//! engine.upsert_identifier(SourceSystem::Accounting, IdentifierKind::Email, "jo@acme.com", None)?;
//!
//! // A pending match is now waiting in the review queue; nothing
//! // merges until a reviewer approves it and a merge call consumes
//! // that approval.
//! ```
//!
//! Merges are journaled before any row changes, so an interrupted merge
//! is resumable rather than half-applied.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod entity;
pub mod error;
pub mod identifier;
pub mod matching;
pub mod mergelog;
pub mod normalize;

// Components
pub mod candidate;
pub mod merge;
pub mod review;
pub mod rewrite;
pub mod scan;
pub mod storage;

// External surface
pub mod api;
pub mod engine;

// Re-export primary types at crate root for convenience
pub use candidate::{CandidateGenerator, ScanReport, ScoringConfig};
pub use engine::{IngestOutcome, ResolutionEngine};
pub use entity::{CanonicalEntity, EntityId};
pub use error::{EngineError, EngineResult, NotFoundError, ValidationError};
pub use identifier::{Identifier, IdentifierId, IdentifierKey, IdentifierKind, SourceSystem};
pub use matching::{MatchId, MatchStatus, PotentialMatch, ReviewDecision, ScoreBand};
pub use merge::{EntityLocks, MergeExecutor, MergeOutcome};
pub use mergelog::{MergeLogEntry, MergeLogId};
pub use review::{ReviewItem, ReviewPage, ReviewQueue};
pub use rewrite::{DependentTable, InMemoryDependentTable, ReferenceRewriter};
pub use scan::{ScanWorker, ScanWorkerConfig};
pub use storage::{
    EntityStore, FileMergeLog, IdentifierStore, InMemoryEntityStore, InMemoryIdentifierStore,
    InMemoryMatchStore, InMemoryMergeLog, MatchStore, MergeLog, ReassignOutcome, StorageError,
};
