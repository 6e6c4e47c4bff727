//! Merge execution.
//!
//! A merge absorbs one canonical entity into another. It is the only
//! destructive operation in the engine, so it is built around two
//! disciplines:
//!
//! - **Log before mutate.** A [`MergeLogEntry`] holding the full
//!   snapshot of the entity about to be absorbed is appended, durably,
//!   before any row changes. If the append fails the merge aborts with
//!   no effect at all.
//! - **Idempotent steps.** Every destructive step after the log write
//!   is safe to re-run, so a crash mid-merge leaves a state that
//!   [`MergeExecutor::resume`] can replay from the log entry.
//!
//! Entity-scoped try-locks serialize merges touching the same entity.
//! Contention fails fast with `ConcurrentMerge` instead of blocking;
//! callers retry.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::entity::{CanonicalEntity, EntityId};
use crate::error::{EngineError, EngineResult, NotFoundError, ValidationError};
use crate::matching::{MatchId, MatchStatus};
use crate::mergelog::{MergeLogEntry, MergeLogId};
use crate::rewrite::ReferenceRewriter;
use crate::storage::{EntityStore, IdentifierStore, MatchStore, MergeLog, StorageError};

/// Entity-scoped try-locks.
///
/// A merge holds the locks for both of its entities for its whole
/// duration. Acquisition is all-or-nothing and never waits.
#[derive(Debug, Default)]
pub struct EntityLocks {
    held: Mutex<HashSet<EntityId>>,
}

impl EntityLocks {
    /// Create an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to lock every listed entity. Fails fast with
    /// `ConcurrentMerge` naming the first contended entity.
    pub fn try_acquire<'a>(
        self: &'a Arc<Self>,
        ids: &[EntityId],
    ) -> EngineResult<EntityLockGuard<'a>> {
        let mut held = self
            .held
            .lock()
            .map_err(|_| EngineError::internal("entity lock table poisoned"))?;
        for &id in ids {
            if held.contains(&id) {
                return Err(EngineError::ConcurrentMerge { entity_id: id });
            }
        }
        for &id in ids {
            held.insert(id);
        }
        Ok(EntityLockGuard {
            locks: self,
            ids: ids.to_vec(),
        })
    }
}

/// Releases its entities when dropped.
#[derive(Debug)]
pub struct EntityLockGuard<'a> {
    locks: &'a Arc<EntityLocks>,
    ids: Vec<EntityId>,
}

impl Drop for EntityLockGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut held) = self.locks.held.lock() {
            for id in &self.ids {
                held.remove(id);
            }
        }
    }
}

/// What a completed merge did.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// Log entry the merge was journaled under.
    pub log_id: MergeLogId,
    /// Surviving entity.
    pub kept: EntityId,
    /// Absorbed entity, now deleted.
    pub merged: EntityId,
    /// Canonical fields backfilled from the absorbed entity.
    pub fields_updated: Vec<String>,
    /// Identifiers whose ownership moved to the kept entity.
    pub identifiers_moved: usize,
    /// Duplicate identifier rows dropped during reassignment.
    pub identifiers_deduplicated: usize,
    /// Dependent-table references repointed.
    pub references_rewritten: usize,
    /// Other potential matches deleted because they referenced the
    /// absorbed entity.
    pub matches_deleted: usize,
}

/// Executes and resumes merges.
pub struct MergeExecutor {
    entities: Arc<dyn EntityStore>,
    identifiers: Arc<dyn IdentifierStore>,
    matches: Arc<dyn MatchStore>,
    log: Arc<dyn MergeLog>,
    rewriter: Arc<ReferenceRewriter>,
    locks: Arc<EntityLocks>,
}

impl MergeExecutor {
    /// Create an executor over the given stores.
    pub fn new(
        entities: Arc<dyn EntityStore>,
        identifiers: Arc<dyn IdentifierStore>,
        matches: Arc<dyn MatchStore>,
        log: Arc<dyn MergeLog>,
        rewriter: Arc<ReferenceRewriter>,
        locks: Arc<EntityLocks>,
    ) -> Self {
        Self {
            entities,
            identifiers,
            matches,
            log,
            rewriter,
            locks,
        }
    }

    /// Absorb `merge_id` into `keep_id`.
    ///
    /// When `match_id` is given, the match must be approved; it is
    /// marked merged on success. All other matches touching the
    /// absorbed entity are deleted.
    ///
    /// # Errors
    /// - `Validation(SelfMerge)` when the ids are equal, with no side
    ///   effects at all.
    /// - `NotFound` when either entity (or the match) is missing.
    /// - `InvalidState` when the named match is not approved.
    /// - `ConcurrentMerge` when another merge holds either entity.
    /// - `PartialMerge` when a step fails after the log entry was
    ///   written; the merge is resumable via [`Self::resume`].
    pub fn merge(
        &self,
        keep_id: EntityId,
        merge_id: EntityId,
        match_id: Option<MatchId>,
        actor: &str,
    ) -> EngineResult<MergeOutcome> {
        if keep_id == merge_id {
            return Err(ValidationError::SelfMerge { id: keep_id }.into());
        }

        let _guard = self.locks.try_acquire(&[keep_id, merge_id])?;

        // Step 1: load both sides. Nothing has mutated yet, so any
        // failure here is a clean abort.
        let kept = self
            .entities
            .get(keep_id)?
            .ok_or(NotFoundError::Entity(keep_id))?;
        let absorbed = self
            .entities
            .get(merge_id)?
            .ok_or(NotFoundError::Entity(merge_id))?;

        if let Some(match_id) = match_id {
            let row = self
                .matches
                .get(match_id)?
                .ok_or(NotFoundError::Match(match_id))?;
            if row.status != MatchStatus::Approved {
                return Err(EngineError::InvalidState {
                    match_id,
                    status: row.status,
                });
            }
        }

        // Step 2: journal the absorbed entity's full state. Must be
        // durable before any mutation.
        let entry = MergeLogEntry::new(keep_id, absorbed, match_id, actor);
        let log_id = entry.id;
        self.log.append(entry)?;

        // Steps 3-7 are destructive. A failure here is partial, not
        // total: the log entry makes the merge resumable.
        self.apply(log_id, kept)
            .map_err(|e| partial(log_id, e))
    }

    /// Replay an interrupted merge from its log entry.
    ///
    /// Every step is idempotent, so resuming a merge that actually
    /// completed is harmless.
    pub fn resume(&self, log_id: MergeLogId) -> EngineResult<MergeOutcome> {
        let entry = self
            .log
            .get(log_id)?
            .ok_or(NotFoundError::MergeLogEntry(log_id))?;

        let _guard = self.locks.try_acquire(&[entry.kept, entry.absorbed])?;

        let kept = self
            .entities
            .get(entry.kept)?
            .ok_or(NotFoundError::Entity(entry.kept))?;

        self.apply(log_id, kept).map_err(|e| partial(log_id, e))
    }

    /// Steps 3-7. `kept` is the surviving entity's current state;
    /// the absorbed side is read from the log entry, because its store
    /// row may already be gone.
    fn apply(&self, log_id: MergeLogId, mut kept: CanonicalEntity) -> EngineResult<MergeOutcome> {
        let entry = self
            .log
            .get(log_id)?
            .ok_or(NotFoundError::MergeLogEntry(log_id))?;
        let snapshot = &entry.snapshot;

        // Step 3: move identifiers. The store's uniqueness index
        // resolves duplicates by deleting the absorbed-side row.
        let reassigned = self.identifiers.reassign(entry.absorbed, entry.kept)?;

        // Step 4: canonical field resolution. Lineage membership marks
        // a replay where this step already ran.
        let fields_updated = if kept.merged_from.contains(&entry.absorbed) {
            Vec::new()
        } else {
            let updated = kept.absorb(snapshot);
            self.entities.update(kept)?;
            updated
        };

        // Step 5: repoint dependent-table references.
        let references_rewritten = self.rewriter.rewrite_all(entry.absorbed, entry.kept)?;

        // Step 6: delete the absorbed row. Already gone on replay.
        match self.entities.delete(entry.absorbed) {
            Ok(()) | Err(StorageError::EntityNotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        // Step 7: consume the triggering match, drop every other
        // proposal that referenced the absorbed entity.
        if let Some(match_id) = entry.match_id {
            if let Some(mut row) = self.matches.get(match_id)? {
                if row.status != MatchStatus::Merged {
                    row.mark_merged();
                    self.matches.update(row)?;
                }
            }
        }
        let matches_deleted = self
            .matches
            .delete_by_entity(entry.absorbed, entry.match_id)?;

        Ok(MergeOutcome {
            log_id,
            kept: entry.kept,
            merged: entry.absorbed,
            fields_updated: fields_updated.iter().map(|f| (*f).to_string()).collect(),
            identifiers_moved: reassigned.moved,
            identifiers_deduplicated: reassigned.deduplicated,
            references_rewritten,
            matches_deleted,
        })
    }
}

fn partial(log_id: MergeLogId, err: EngineError) -> EngineError {
    match err {
        // Lock and replay errors keep their own shape.
        e @ (EngineError::ConcurrentMerge { .. } | EngineError::PartialMerge { .. }) => e,
        e => EngineError::PartialMerge {
            log_id,
            reason: e.to_string(),
        },
    }
}
