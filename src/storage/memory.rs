//! In-memory storage implementations.
//!
//! Thread-safe and indexed, suitable for embedded use and tests. All
//! state lives behind a single `RwLock` per store so multi-map updates
//! stay consistent under concurrency.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use crate::entity::{CanonicalEntity, EntityId};
use crate::identifier::{Identifier, IdentifierId, IdentifierKey, IdentifierKind, SourceSystem};
use crate::matching::{pair_key, MatchId, MatchStatus, PotentialMatch};
use crate::mergelog::{MergeLogEntry, MergeLogId};
use crate::storage::traits::{
    EntityStore, IdentifierStore, MatchStore, MergeLog, ReassignOutcome, StorageError,
};

fn lock_err(kind: &str) -> StorageError {
    StorageError::BackendError(format!("{kind} lock poisoned"))
}

/// In-memory entity store.
#[derive(Default)]
pub struct InMemoryEntityStore {
    entities: RwLock<HashMap<EntityId, CanonicalEntity>>,
}

impl InMemoryEntityStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl EntityStore for InMemoryEntityStore {
    fn insert(&self, entity: CanonicalEntity) -> Result<(), StorageError> {
        let mut entities = self.entities.write().map_err(|_| lock_err("entity"))?;
        if entities.contains_key(&entity.id) {
            return Err(StorageError::DuplicateKey(entity.id.to_string()));
        }
        entities.insert(entity.id, entity);
        Ok(())
    }

    fn get(&self, id: EntityId) -> Result<Option<CanonicalEntity>, StorageError> {
        let entities = self.entities.read().map_err(|_| lock_err("entity"))?;
        Ok(entities.get(&id).cloned())
    }

    fn update(&self, entity: CanonicalEntity) -> Result<(), StorageError> {
        let mut entities = self.entities.write().map_err(|_| lock_err("entity"))?;
        if !entities.contains_key(&entity.id) {
            return Err(StorageError::EntityNotFound(entity.id));
        }
        entities.insert(entity.id, entity);
        Ok(())
    }

    fn delete(&self, id: EntityId) -> Result<(), StorageError> {
        let mut entities = self.entities.write().map_err(|_| lock_err("entity"))?;
        entities
            .remove(&id)
            .map(|_| ())
            .ok_or(StorageError::EntityNotFound(id))
    }

    fn count(&self) -> Result<usize, StorageError> {
        let entities = self.entities.read().map_err(|_| lock_err("entity"))?;
        Ok(entities.len())
    }
}

/// Interior state of [`InMemoryIdentifierStore`]. A single struct behind
/// one lock keeps the row map and both indexes in step.
#[derive(Default)]
struct IdentifierState {
    rows: HashMap<IdentifierId, Identifier>,
    /// Uniqueness index: (source, kind, normalized) -> row. The only
    /// conflict oracle in the system.
    by_key: HashMap<IdentifierKey, IdentifierId>,
    by_entity: HashMap<EntityId, HashSet<IdentifierId>>,
    /// Blocking index: (kind, normalized) -> rows across all sources.
    by_normalized: HashMap<(IdentifierKind, String), HashSet<IdentifierId>>,
}

impl IdentifierState {
    fn unindex(&mut self, row: &Identifier) {
        // Only the row that owns the key entry may clear it.
        if self.by_key.get(&row.key()) == Some(&row.id) {
            self.by_key.remove(&row.key());
        }
        if let Some(set) = self.by_entity.get_mut(&row.entity_id) {
            set.remove(&row.id);
            if set.is_empty() {
                self.by_entity.remove(&row.entity_id);
            }
        }
        let norm_key = (row.kind.clone(), row.normalized.clone());
        if let Some(set) = self.by_normalized.get_mut(&norm_key) {
            set.remove(&row.id);
            if set.is_empty() {
                self.by_normalized.remove(&norm_key);
            }
        }
    }

    fn index(&mut self, row: &Identifier) {
        self.by_key.insert(row.key(), row.id);
        self.by_entity.entry(row.entity_id).or_default().insert(row.id);
        self.by_normalized
            .entry((row.kind.clone(), row.normalized.clone()))
            .or_default()
            .insert(row.id);
    }
}

/// In-memory identifier store with tuple-uniqueness enforcement.
#[derive(Default)]
pub struct InMemoryIdentifierStore {
    state: RwLock<IdentifierState>,
}

impl InMemoryIdentifierStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentifierStore for InMemoryIdentifierStore {
    fn insert(&self, identifier: Identifier) -> Result<IdentifierId, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("identifier"))?;
        if let Some(existing_id) = state.by_key.get(&identifier.key()) {
            let existing = state.rows.get(existing_id).ok_or_else(|| {
                StorageError::BackendError("identifier key index out of step".to_string())
            })?;
            if existing.entity_id == identifier.entity_id {
                // Same fact from the same source: idempotent no-op.
                return Ok(existing.id);
            }
            return Err(StorageError::DuplicateTuple {
                key: identifier.key(),
                owner: existing.entity_id,
            });
        }
        let id = identifier.id;
        state.index(&identifier);
        state.rows.insert(id, identifier);
        Ok(id)
    }

    fn get(&self, id: IdentifierId) -> Result<Option<Identifier>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("identifier"))?;
        Ok(state.rows.get(&id).cloned())
    }

    fn find_by_key(&self, key: &IdentifierKey) -> Result<Option<Identifier>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("identifier"))?;
        Ok(state
            .by_key
            .get(key)
            .and_then(|id| state.rows.get(id))
            .cloned())
    }

    fn find_by_entity(&self, entity_id: EntityId) -> Result<Vec<Identifier>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("identifier"))?;
        let Some(ids) = state.by_entity.get(&entity_id) else {
            return Ok(Vec::new());
        };
        Ok(ids.iter().filter_map(|id| state.rows.get(id)).cloned().collect())
    }

    fn list_by_sources(
        &self,
        entity_id: EntityId,
    ) -> Result<BTreeMap<SourceSystem, Vec<Identifier>>, StorageError> {
        let mut grouped: BTreeMap<SourceSystem, Vec<Identifier>> = BTreeMap::new();
        for row in self.find_by_entity(entity_id)? {
            grouped.entry(row.source.clone()).or_default().push(row);
        }
        for rows in grouped.values_mut() {
            rows.sort_by(|a, b| {
                a.kind
                    .to_string()
                    .cmp(&b.kind.to_string())
                    .then_with(|| a.normalized.cmp(&b.normalized))
            });
        }
        Ok(grouped)
    }

    fn find_by_normalized(
        &self,
        kind: &IdentifierKind,
        normalized: &str,
    ) -> Result<Vec<Identifier>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("identifier"))?;
        let Some(ids) = state
            .by_normalized
            .get(&(kind.clone(), normalized.to_string()))
        else {
            return Ok(Vec::new());
        };
        Ok(ids.iter().filter_map(|id| state.rows.get(id)).cloned().collect())
    }

    fn all(&self) -> Result<Vec<Identifier>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("identifier"))?;
        Ok(state.rows.values().cloned().collect())
    }

    fn reassign(&self, from: EntityId, to: EntityId) -> Result<ReassignOutcome, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("identifier"))?;
        let Some(ids) = state.by_entity.get(&from) else {
            return Ok(ReassignOutcome::default());
        };
        let ids: Vec<IdentifierId> = ids.iter().copied().collect();
        let mut outcome = ReassignOutcome::default();
        for id in ids {
            let Some(row) = state.rows.get(&id).cloned() else {
                continue;
            };
            state.unindex(&row);
            let mut moved = row;
            moved.entity_id = to;
            // The uniqueness index decides: if the target already holds
            // this tuple, the source-side row is redundant and dropped.
            if state.by_key.contains_key(&moved.key()) {
                state.rows.remove(&id);
                outcome.deduplicated += 1;
            } else {
                state.index(&moved);
                state.rows.insert(id, moved);
                outcome.moved += 1;
            }
        }
        Ok(outcome)
    }

    fn delete(&self, id: IdentifierId) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("identifier"))?;
        let Some(row) = state.rows.remove(&id) else {
            return Err(StorageError::IdentifierNotFound(id));
        };
        state.unindex(&row);
        Ok(())
    }

    fn count(&self) -> Result<usize, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("identifier"))?;
        Ok(state.rows.len())
    }
}

/// Interior state of [`InMemoryMatchStore`].
#[derive(Default)]
struct MatchState {
    rows: HashMap<MatchId, PotentialMatch>,
    /// Every unordered pair ever proposed, rejected rows included, so a
    /// rejected pair is never proposed again.
    by_pair: HashMap<(EntityId, EntityId), HashSet<MatchId>>,
    by_entity: HashMap<EntityId, HashSet<MatchId>>,
}

impl MatchState {
    fn index(&mut self, row: &PotentialMatch) {
        self.by_pair
            .entry(pair_key(row.entity_a, row.entity_b))
            .or_default()
            .insert(row.id);
        self.by_entity.entry(row.entity_a).or_default().insert(row.id);
        self.by_entity.entry(row.entity_b).or_default().insert(row.id);
    }
}

/// In-memory potential-match store.
#[derive(Default)]
pub struct InMemoryMatchStore {
    state: RwLock<MatchState>,
}

impl InMemoryMatchStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl MatchStore for InMemoryMatchStore {
    fn insert(&self, potential_match: PotentialMatch) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("match"))?;
        if state.rows.contains_key(&potential_match.id) {
            return Err(StorageError::DuplicateKey(potential_match.id.to_string()));
        }
        let pair = pair_key(potential_match.entity_a, potential_match.entity_b);
        let open_exists = state
            .by_pair
            .get(&pair)
            .is_some_and(|ids| {
                ids.iter().any(|id| {
                    state
                        .rows
                        .get(id)
                        .is_some_and(|m| m.status != MatchStatus::Rejected)
                })
            });
        if open_exists {
            return Err(StorageError::DuplicateKey(format!(
                "match pair ({}, {})",
                pair.0, pair.1
            )));
        }
        state.index(&potential_match);
        state.rows.insert(potential_match.id, potential_match);
        Ok(())
    }

    fn get(&self, id: MatchId) -> Result<Option<PotentialMatch>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("match"))?;
        Ok(state.rows.get(&id).cloned())
    }

    fn update(&self, potential_match: PotentialMatch) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("match"))?;
        if !state.rows.contains_key(&potential_match.id) {
            return Err(StorageError::MatchNotFound(potential_match.id));
        }
        state.rows.insert(potential_match.id, potential_match);
        Ok(())
    }

    fn pair_exists(&self, a: EntityId, b: EntityId) -> Result<bool, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("match"))?;
        Ok(state.by_pair.contains_key(&pair_key(a, b)))
    }

    fn list(
        &self,
        status: MatchStatus,
        min_score: f32,
        limit: usize,
    ) -> Result<Vec<PotentialMatch>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("match"))?;
        let mut rows: Vec<PotentialMatch> = state
            .rows
            .values()
            .filter(|m| m.status == status && m.score >= min_score)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        rows.truncate(limit);
        Ok(rows)
    }

    fn count_by_status(&self, status: MatchStatus) -> Result<usize, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("match"))?;
        Ok(state.rows.values().filter(|m| m.status == status).count())
    }

    fn delete_by_entity(
        &self,
        entity_id: EntityId,
        keep: Option<MatchId>,
    ) -> Result<usize, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("match"))?;
        let Some(ids) = state.by_entity.get(&entity_id) else {
            return Ok(0);
        };
        let ids: Vec<MatchId> = ids
            .iter()
            .copied()
            .filter(|id| Some(*id) != keep)
            .collect();
        let mut removed = 0;
        for id in ids {
            let Some(row) = state.rows.remove(&id) else {
                continue;
            };
            removed += 1;
            let pair = pair_key(row.entity_a, row.entity_b);
            if let Some(set) = state.by_pair.get_mut(&pair) {
                set.remove(&id);
                if set.is_empty() {
                    state.by_pair.remove(&pair);
                }
            }
            for side in [row.entity_a, row.entity_b] {
                if let Some(set) = state.by_entity.get_mut(&side) {
                    set.remove(&id);
                    if set.is_empty() {
                        state.by_entity.remove(&side);
                    }
                }
            }
        }
        Ok(removed)
    }
}

/// In-memory merge log. Append order is preserved.
#[derive(Default)]
pub struct InMemoryMergeLog {
    entries: RwLock<Vec<MergeLogEntry>>,
}

impl InMemoryMergeLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl MergeLog for InMemoryMergeLog {
    fn append(&self, entry: MergeLogEntry) -> Result<(), StorageError> {
        let mut entries = self.entries.write().map_err(|_| lock_err("mergelog"))?;
        entries.push(entry);
        Ok(())
    }

    fn get(&self, id: MergeLogId) -> Result<Option<MergeLogEntry>, StorageError> {
        let entries = self.entries.read().map_err(|_| lock_err("mergelog"))?;
        Ok(entries.iter().find(|e| e.id == id).cloned())
    }

    fn entries(&self) -> Result<Vec<MergeLogEntry>, StorageError> {
        let entries = self.entries.read().map_err(|_| lock_err("mergelog"))?;
        Ok(entries.clone())
    }

    fn entries_for(&self, entity_id: EntityId) -> Result<Vec<MergeLogEntry>, StorageError> {
        let entries = self.entries.read().map_err(|_| lock_err("mergelog"))?;
        Ok(entries
            .iter()
            .filter(|e| e.kept == entity_id || e.absorbed == entity_id)
            .cloned()
            .collect())
    }
}
