//! Human review queue.
//!
//! Nothing merges without a human saying so. The queue lists pending
//! matches enriched with both entities and their identifiers grouped by
//! source, so a reviewer sees the evidence next to the proposal, and
//! records decisions.
//!
//! Enrichment happens at read time. Stored match rows hold only the
//! entity IDs; the entities shown are always current, not snapshots
//! from scan time.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::entity::{CanonicalEntity, EntityId};
use crate::error::{EngineError, EngineResult, NotFoundError};
use crate::identifier::{Identifier, SourceSystem};
use crate::matching::{MatchId, MatchStatus, PotentialMatch, ReviewDecision};
use crate::storage::{EntityStore, IdentifierStore, MatchStore};

/// A pending match enriched with its evidence.
#[derive(Debug, Clone)]
pub struct ReviewItem {
    /// The proposed match.
    pub potential_match: PotentialMatch,
    /// Current state of the first entity.
    pub entity_a: CanonicalEntity,
    /// Current state of the second entity.
    pub entity_b: CanonicalEntity,
    /// First entity's identifiers, grouped by source system.
    pub identifiers_a: BTreeMap<SourceSystem, Vec<Identifier>>,
    /// Second entity's identifiers, grouped by source system.
    pub identifiers_b: BTreeMap<SourceSystem, Vec<Identifier>>,
}

/// One page of the review queue.
#[derive(Debug, Clone)]
pub struct ReviewPage {
    /// Enriched matches, highest score first.
    pub items: Vec<ReviewItem>,
    /// Total pending matches, regardless of paging or score filter.
    pub pending_total: usize,
}

/// The review queue over match, entity and identifier stores.
pub struct ReviewQueue {
    entities: Arc<dyn EntityStore>,
    identifiers: Arc<dyn IdentifierStore>,
    matches: Arc<dyn MatchStore>,
}

impl ReviewQueue {
    /// Create a queue over the given stores.
    pub fn new(
        entities: Arc<dyn EntityStore>,
        identifiers: Arc<dyn IdentifierStore>,
        matches: Arc<dyn MatchStore>,
    ) -> Self {
        Self {
            entities,
            identifiers,
            matches,
        }
    }

    /// List matches in the given status scoring at least `min_score`,
    /// highest score first, truncated to `limit`. Reviewers page the
    /// pending queue; approved intents awaiting their merge call are
    /// listed the same way.
    pub fn list(
        &self,
        status: MatchStatus,
        min_score: f32,
        limit: usize,
    ) -> EngineResult<ReviewPage> {
        let rows = self.matches.list(status, min_score, limit)?;
        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            items.push(self.enrich(row)?);
        }
        let pending_total = self.matches.count_by_status(MatchStatus::Pending)?;
        Ok(ReviewPage {
            items,
            pending_total,
        })
    }

    /// Fetch one match with its evidence.
    pub fn item(&self, match_id: MatchId) -> EngineResult<ReviewItem> {
        let row = self
            .matches
            .get(match_id)?
            .ok_or(NotFoundError::Match(match_id))?;
        self.enrich(row)
    }

    /// Record a reviewer's decision on a match.
    ///
    /// A verdict is revocable until the merge consumes it: approving,
    /// rejecting or deferring a pending, approved or rejected row just
    /// rewrites it. Only a merged match is immutable; deciding one
    /// fails with `InvalidState`.
    pub fn decide(
        &self,
        match_id: MatchId,
        decision: ReviewDecision,
        notes: Option<&str>,
    ) -> EngineResult<PotentialMatch> {
        let mut row = self
            .matches
            .get(match_id)?
            .ok_or(NotFoundError::Match(match_id))?;
        if row.status == MatchStatus::Merged {
            return Err(EngineError::InvalidState {
                match_id,
                status: row.status,
            });
        }
        row.apply_decision(decision, notes.map(str::to_string));
        self.matches.update(row.clone())?;
        Ok(row)
    }

    fn enrich(&self, row: PotentialMatch) -> EngineResult<ReviewItem> {
        let entity_a = self.entity(row.entity_a)?;
        let entity_b = self.entity(row.entity_b)?;
        let identifiers_a = self.identifiers.list_by_sources(row.entity_a)?;
        let identifiers_b = self.identifiers.list_by_sources(row.entity_b)?;
        Ok(ReviewItem {
            potential_match: row,
            entity_a,
            entity_b,
            identifiers_a,
            identifiers_b,
        })
    }

    fn entity(&self, id: EntityId) -> EngineResult<CanonicalEntity> {
        Ok(self.entities.get(id)?.ok_or(NotFoundError::Entity(id))?)
    }
}
