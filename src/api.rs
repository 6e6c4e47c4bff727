//! Request and response shapes for the engine's external surface.
//!
//! Transport-neutral: these are the JSON bodies of the match listing,
//! decision and merge calls, usable behind any HTTP framework or a
//! message bus. Field names are camelCase on the wire.

use serde::{Deserialize, Serialize};

use crate::entity::EntityId;
use crate::error::EngineError;
use crate::matching::{MatchId, MatchStatus, ReviewDecision, ScoreBand};
use crate::merge::MergeOutcome;
use crate::review::{ReviewItem, ReviewPage};

fn default_limit() -> usize {
    50
}

/// Query for `GET /matches`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMatchesRequest {
    /// Which rows to list. Defaults to the pending queue; approved
    /// intents awaiting their merge call are one status away.
    #[serde(default)]
    pub status: MatchStatus,
    /// Minimum score to include. Defaults to zero.
    #[serde(default)]
    pub min_score: f32,
    /// Page size.
    #[serde(default = "default_limit")]
    pub limit: usize,
}

impl Default for ListMatchesRequest {
    fn default() -> Self {
        Self {
            status: MatchStatus::Pending,
            min_score: 0.0,
            limit: default_limit(),
        }
    }
}

/// A match as shown to reviewers: the stored row plus read-time
/// evidence about both sides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct MatchView {
    pub match_id: MatchId,
    pub entity_a: EntityId,
    pub entity_b: EntityId,
    pub score: f32,
    /// Default UI treatment for the score. Never triggers anything.
    pub band: ScoreBand,
    pub status: MatchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Distinct source systems with identifiers on the first entity.
    pub sources_a: Vec<String>,
    /// Distinct source systems with identifiers on the second entity.
    pub sources_b: Vec<String>,
}

impl From<&ReviewItem> for MatchView {
    fn from(item: &ReviewItem) -> Self {
        let row = &item.potential_match;
        Self {
            match_id: row.id,
            entity_a: row.entity_a,
            entity_b: row.entity_b,
            score: row.score,
            band: row.band(),
            status: row.status,
            notes: row.notes.clone(),
            sources_a: item.identifiers_a.keys().map(ToString::to_string).collect(),
            sources_b: item.identifiers_b.keys().map(ToString::to_string).collect(),
        }
    }
}

/// Response for `GET /matches`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct ListMatchesResponse {
    pub matches: Vec<MatchView>,
    /// Total pending matches, regardless of paging or score filter.
    pub pending_total: usize,
}

impl From<&ReviewPage> for ListMatchesResponse {
    fn from(page: &ReviewPage) -> Self {
        Self {
            matches: page.items.iter().map(MatchView::from).collect(),
            pending_total: page.pending_total,
        }
    }
}

/// Body of `PATCH /matches`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct DecideRequest {
    pub match_id: MatchId,
    pub status: ReviewDecision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Response for `PATCH /matches`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct DecideResponse {
    pub ok: bool,
    #[serde(rename = "match")]
    pub decided: MatchView,
}

/// Body of `POST /merge`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct MergeRequest {
    pub keep_entity_id: EntityId,
    pub merge_entity_id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_id: Option<MatchId>,
}

/// Response for `POST /merge`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct MergeResponse {
    pub ok: bool,
    pub kept: EntityId,
    pub merged: EntityId,
    pub fields_updated: Vec<String>,
    pub identifiers_moved: usize,
    pub identifiers_deduplicated: usize,
    pub references_rewritten: usize,
}

impl From<&MergeOutcome> for MergeResponse {
    fn from(outcome: &MergeOutcome) -> Self {
        Self {
            ok: true,
            kept: outcome.kept,
            merged: outcome.merged,
            fields_updated: outcome.fields_updated.clone(),
            identifiers_moved: outcome.identifiers_moved,
            identifiers_deduplicated: outcome.identifiers_deduplicated,
            references_rewritten: outcome.references_rewritten,
        }
    }
}

/// Structured error body, paired with the status from
/// [`EngineError::http_status`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct ErrorBody {
    pub error: String,
    /// Whether the caller should retry with backoff.
    pub retryable: bool,
}

impl From<&EngineError> for ErrorBody {
    fn from(err: &EngineError) -> Self {
        Self {
            error: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}
