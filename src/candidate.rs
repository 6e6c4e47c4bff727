//! Candidate generation.
//!
//! Pairs of entities that share a normalized identifier value are
//! proposed as potential matches for human review. Blocking keeps the
//! comparison space small: only entities landing in the same
//! (kind, normalized value) bucket are ever compared, never the full
//! cross product.
//!
//! Generation never merges anything. Its only write is inserting
//! pending [`PotentialMatch`] rows.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::entity::EntityId;
use crate::error::EngineResult;
use crate::identifier::{Identifier, IdentifierKind, SourceSystem};
use crate::matching::{pair_key, PotentialMatch};
use crate::storage::{IdentifierStore, MatchStore};

/// Weights for candidate scoring. All weights are additive on a score
/// clamped to `[0.0, 1.0]`.
#[derive(Debug, Clone, Copy)]
pub struct ScoringConfig {
    /// Added once per shared normalized identifier value.
    pub exact_match_weight: f32,
    /// Added once when the shared evidence spans more than one source
    /// system. Independent systems agreeing is stronger evidence than
    /// one system repeating itself.
    pub multi_source_bonus: f32,
    /// Subtracted per identifier kind both entities carry without
    /// sharing a single value of it.
    pub conflict_penalty: f32,
    /// Pairs scoring below this are not proposed at all.
    pub min_score: f32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            exact_match_weight: 0.6,
            multi_source_bonus: 0.25,
            conflict_penalty: 0.2,
            min_score: 0.3,
        }
    }
}

/// Outcome of a candidate scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Distinct entity pairs that shared at least one blocking bucket.
    pub pairs_considered: usize,
    /// New pending matches written.
    pub proposed: usize,
    /// Pairs skipped because a match row (any status, rejected
    /// included) already exists.
    pub skipped_existing: usize,
    /// Pairs skipped for scoring below the minimum.
    pub skipped_low_score: usize,
}

/// Generates potential matches from shared identifier values.
pub struct CandidateGenerator {
    identifiers: Arc<dyn IdentifierStore>,
    matches: Arc<dyn MatchStore>,
    config: ScoringConfig,
}

impl CandidateGenerator {
    /// Create a generator over the given stores.
    pub fn new(
        identifiers: Arc<dyn IdentifierStore>,
        matches: Arc<dyn MatchStore>,
        config: ScoringConfig,
    ) -> Self {
        Self {
            identifiers,
            matches,
            config,
        }
    }

    /// Scan every identifier in the store and propose matches for all
    /// newly discovered pairs.
    pub fn scan_all(&self) -> EngineResult<ScanReport> {
        let rows = self.identifiers.all()?;
        let pairs = blocking_pairs(&rows, None);
        self.propose(&rows, pairs)
    }

    /// Scan only for pairs involving the given entity. Run after an
    /// identifier lands on it, so review lag never grows with store
    /// size.
    pub fn scan_entity(&self, entity_id: EntityId) -> EngineResult<ScanReport> {
        let mut rows = Vec::new();
        let own = self.identifiers.find_by_entity(entity_id)?;
        let mut seen: HashSet<(IdentifierKind, String)> = HashSet::new();
        for row in &own {
            if row.normalized.is_empty() {
                continue;
            }
            if seen.insert((row.kind.clone(), row.normalized.clone())) {
                rows.extend(
                    self.identifiers
                        .find_by_normalized(&row.kind, &row.normalized)?,
                );
            }
        }
        // Pull the full identifier sets of every entity in those
        // buckets so conflict scoring sees all their kinds.
        let entities: HashSet<EntityId> = rows.iter().map(|r| r.entity_id).collect();
        let mut full: Vec<Identifier> = Vec::new();
        for other in entities {
            full.extend(self.identifiers.find_by_entity(other)?);
        }
        let pairs = blocking_pairs(&full, Some(entity_id));
        self.propose(&full, pairs)
    }

    fn propose(
        &self,
        rows: &[Identifier],
        pairs: HashSet<(EntityId, EntityId)>,
    ) -> EngineResult<ScanReport> {
        let by_entity = group_by_entity(rows);
        let mut report = ScanReport {
            pairs_considered: pairs.len(),
            ..ScanReport::default()
        };
        for (a, b) in pairs {
            if self.matches.pair_exists(a, b)? {
                report.skipped_existing += 1;
                continue;
            }
            let (Some(rows_a), Some(rows_b)) = (by_entity.get(&a), by_entity.get(&b)) else {
                continue;
            };
            let score = score_pair(rows_a, rows_b, &self.config);
            if score < self.config.min_score {
                report.skipped_low_score += 1;
                continue;
            }
            self.matches.insert(PotentialMatch::new(a, b, score))?;
            report.proposed += 1;
        }
        Ok(report)
    }
}

/// All unordered entity pairs sharing a (kind, normalized) bucket.
/// When `anchor` is set, only pairs touching it are returned.
fn blocking_pairs(
    rows: &[Identifier],
    anchor: Option<EntityId>,
) -> HashSet<(EntityId, EntityId)> {
    let mut buckets: HashMap<(IdentifierKind, &str), HashSet<EntityId>> = HashMap::new();
    for row in rows {
        if row.normalized.is_empty() {
            continue;
        }
        buckets
            .entry((row.kind.clone(), row.normalized.as_str()))
            .or_default()
            .insert(row.entity_id);
    }

    let mut pairs = HashSet::new();
    for entities in buckets.values() {
        if entities.len() < 2 {
            continue;
        }
        let entities: Vec<EntityId> = entities.iter().copied().collect();
        for (i, &a) in entities.iter().enumerate() {
            for &b in &entities[i + 1..] {
                if anchor.is_some_and(|anchor| a != anchor && b != anchor) {
                    continue;
                }
                pairs.insert(pair_key(a, b));
            }
        }
    }
    pairs
}

fn group_by_entity(rows: &[Identifier]) -> HashMap<EntityId, Vec<&Identifier>> {
    let mut grouped: HashMap<EntityId, Vec<&Identifier>> = HashMap::new();
    for row in rows {
        grouped.entry(row.entity_id).or_default().push(row);
    }
    grouped
}

/// Score a pair from its identifier sets.
fn score_pair(rows_a: &[&Identifier], rows_b: &[&Identifier], config: &ScoringConfig) -> f32 {
    let values_a: HashSet<(&IdentifierKind, &str)> = rows_a
        .iter()
        .filter(|r| !r.normalized.is_empty())
        .map(|r| (&r.kind, r.normalized.as_str()))
        .collect();
    let values_b: HashSet<(&IdentifierKind, &str)> = rows_b
        .iter()
        .filter(|r| !r.normalized.is_empty())
        .map(|r| (&r.kind, r.normalized.as_str()))
        .collect();

    let shared: Vec<(&IdentifierKind, &str)> =
        values_a.intersection(&values_b).copied().collect();

    let mut score = shared.len() as f32 * config.exact_match_weight;

    // Shared evidence spanning independent source systems.
    let spans_sources = shared.iter().any(|&(kind, normalized)| {
        let mut all = sources_of(rows_a, kind, normalized);
        all.extend(sources_of(rows_b, kind, normalized));
        all.len() > 1
    });
    if spans_sources {
        score += config.multi_source_bonus;
    }

    // Kinds both entities carry without agreeing on any value.
    let kinds_a: HashSet<&IdentifierKind> = values_a.iter().map(|(k, _)| *k).collect();
    let kinds_b: HashSet<&IdentifierKind> = values_b.iter().map(|(k, _)| *k).collect();
    for kind in kinds_a.intersection(&kinds_b) {
        if !shared.iter().any(|(k, _)| k == kind) {
            score -= config.conflict_penalty;
        }
    }

    score.clamp(0.0, 1.0)
}

/// Source systems attesting the given (kind, normalized) value within
/// one entity's identifier set.
fn sources_of<'a>(
    rows: &[&'a Identifier],
    kind: &IdentifierKind,
    normalized: &str,
) -> HashSet<&'a SourceSystem> {
    rows.iter()
        .filter(|r| &r.kind == kind && r.normalized == normalized)
        .map(|r| &r.source)
        .collect()
}
