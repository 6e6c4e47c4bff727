//! Potential-match types for the review workflow.
//!
//! Potential matches are explicit objects, not hidden heuristics. When two
//! canonical entities share an identifier we record a scored pairing and
//! let a reviewer decide; the engine never merges on its own.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::EntityId;

/// Unique identifier for a potential match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchId(Uuid);

impl MatchId {
    /// Creates a new random match ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The review status of a potential match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    /// Awaiting review. Deferred matches return here.
    Pending,

    /// A reviewer approved the pairing; the merge has not run yet.
    Approved,

    /// A reviewer rejected the pairing.
    Rejected,

    /// The merge executed. Terminal.
    Merged,
}

impl Default for MatchStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
            Self::Merged => write!(f, "merged"),
        }
    }
}

/// A reviewer's verdict on a match.
///
/// `Deferred` is not a stored state: it writes the match back to
/// `Pending` with notes attached, so it keeps surfacing in review passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    /// Merge is cleared to run.
    Approved,
    /// The pair is not a duplicate.
    Rejected,
    /// Not decidable yet; keep it in the queue.
    Deferred,
}

impl fmt::Display for ReviewDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
            Self::Deferred => write!(f, "deferred"),
        }
    }
}

/// Default UI treatment for a score. Bands order and color candidates;
/// they never trigger a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreBand {
    /// Near-certain duplicate; surface at the top of the queue.
    Strong,
    /// Likely duplicate; ordinary review.
    Probable,
    /// Thin evidence; review when the queue is empty.
    Weak,
}

impl ScoreBand {
    /// Band thresholds. Presentation defaults only.
    #[must_use]
    pub fn for_score(score: f32) -> Self {
        if score >= 0.85 {
            Self::Strong
        } else if score >= 0.55 {
            Self::Probable
        } else {
            Self::Weak
        }
    }
}

/// A proposed pairing of two canonical entities with a confidence score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PotentialMatch {
    /// Unique identifier for this match.
    pub id: MatchId,

    /// One side of the proposed pairing.
    pub entity_a: EntityId,
    /// The other side.
    pub entity_b: EntityId,

    /// Confidence score in [0, 1]. An opaque ordering signal for review.
    pub score: f32,

    /// Where the match sits in the review workflow.
    pub status: MatchStatus,

    /// Reviewer notes, accumulated across deferrals.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    /// When the pair was proposed.
    pub created_at: DateTime<Utc>,

    /// When a terminal decision was recorded, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
}

impl PotentialMatch {
    /// Creates a pending match. The score is clamped to [0, 1].
    ///
    /// # Panics
    /// Debug-asserts that the two entity ids differ; callers filter
    /// self-pairs before construction.
    #[must_use]
    pub fn new(entity_a: EntityId, entity_b: EntityId, score: f32) -> Self {
        debug_assert_ne!(entity_a, entity_b, "self-pairs must be filtered upstream");
        Self {
            id: MatchId::new(),
            entity_a,
            entity_b,
            score: score.clamp(0.0, 1.0),
            status: MatchStatus::Pending,
            notes: None,
            created_at: Utc::now(),
            decided_at: None,
        }
    }

    /// The unordered pair key: (min, max) of the two entity ids. Two
    /// matches over the same entities compare equal regardless of order.
    #[must_use]
    pub fn pair_key(&self) -> (EntityId, EntityId) {
        pair_key(self.entity_a, self.entity_b)
    }

    /// Returns true if this match references the given entity on either side.
    #[must_use]
    pub fn touches(&self, entity_id: EntityId) -> bool {
        self.entity_a == entity_id || self.entity_b == entity_id
    }

    /// The default UI band for this match's score.
    #[must_use]
    pub fn band(&self) -> ScoreBand {
        ScoreBand::for_score(self.score)
    }

    /// Applies a terminal or deferral decision. `decided_at` is only
    /// stamped for terminal decisions; a deferred match is still
    /// undecided, even when the deferral revokes an earlier verdict.
    pub fn apply_decision(&mut self, decision: ReviewDecision, notes: Option<String>) {
        self.status = match decision {
            ReviewDecision::Approved => MatchStatus::Approved,
            ReviewDecision::Rejected => MatchStatus::Rejected,
            // Deferral returns the match to the pending pool.
            ReviewDecision::Deferred => MatchStatus::Pending,
        };
        if let Some(new_notes) = notes {
            self.notes = Some(match self.notes.take() {
                Some(existing) => format!("{existing}\n{new_notes}"),
                None => new_notes,
            });
        }
        self.decided_at = if self.status == MatchStatus::Pending {
            None
        } else {
            Some(Utc::now())
        };
    }

    /// Marks the match merged. Terminal.
    pub fn mark_merged(&mut self) {
        self.status = MatchStatus::Merged;
        self.decided_at = Some(Utc::now());
    }
}

impl PartialEq for PotentialMatch {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PotentialMatch {}

/// Orders two entity ids into an unordered pair key.
#[must_use]
pub fn pair_key(a: EntityId, b: EntityId) -> (EntityId, EntityId) {
    if a <= b { (a, b) } else { (b, a) }
}
