//! The resolution engine facade.
//!
//! [`ResolutionEngine`] wires the stores, candidate generator, review
//! queue and merge executor together behind one surface. Source-system
//! feeds call [`ResolutionEngine::upsert_identifier`]; reviewers drive
//! [`ResolutionEngine::list_matches`], [`ResolutionEngine::decide`] and
//! [`ResolutionEngine::merge`]; operators replay interrupted merges
//! with [`ResolutionEngine::resume`].

use std::sync::Arc;

use crate::api::{
    DecideRequest, DecideResponse, ErrorBody, ListMatchesRequest, ListMatchesResponse, MatchView,
    MergeRequest, MergeResponse,
};
use crate::candidate::{CandidateGenerator, ScanReport, ScoringConfig};
use crate::entity::{CanonicalEntity, EntityId};
use crate::error::{EngineError, EngineResult, NotFoundError, ValidationError};
use crate::identifier::{Identifier, IdentifierId, IdentifierKind, SourceSystem};
use crate::matching::PotentialMatch;
use crate::merge::{EntityLocks, MergeExecutor, MergeOutcome};
use crate::mergelog::{MergeLogEntry, MergeLogId};
use crate::normalize;
use crate::review::ReviewQueue;
use crate::rewrite::ReferenceRewriter;
use crate::scan::{ScanWorker, ScanWorkerConfig};
use crate::storage::{
    EntityStore, IdentifierStore, InMemoryEntityStore, InMemoryIdentifierStore, InMemoryMatchStore,
    InMemoryMergeLog, MatchStore, MergeLog, StorageError,
};

/// What ingesting an identifier did.
#[derive(Debug, Clone, Copy)]
pub struct IngestOutcome {
    /// Entity the identifier now belongs to.
    pub entity_id: EntityId,
    /// The stored identifier row.
    pub identifier_id: IdentifierId,
    /// Whether a new canonical entity was created for it.
    pub created_entity: bool,
    /// Pending matches proposed by the post-ingest scan.
    pub matches_proposed: usize,
}

/// Entity resolution and merge engine.
pub struct ResolutionEngine {
    entities: Arc<dyn EntityStore>,
    identifiers: Arc<dyn IdentifierStore>,
    matches: Arc<dyn MatchStore>,
    generator: CandidateGenerator,
    queue: ReviewQueue,
    executor: MergeExecutor,
    log: Arc<dyn MergeLog>,
    config: ScoringConfig,
}

impl ResolutionEngine {
    /// Assemble an engine over the given backends.
    pub fn new(
        entities: Arc<dyn EntityStore>,
        identifiers: Arc<dyn IdentifierStore>,
        matches: Arc<dyn MatchStore>,
        log: Arc<dyn MergeLog>,
        rewriter: Arc<ReferenceRewriter>,
        config: ScoringConfig,
    ) -> Self {
        let generator =
            CandidateGenerator::new(Arc::clone(&identifiers), Arc::clone(&matches), config);
        let queue = ReviewQueue::new(
            Arc::clone(&entities),
            Arc::clone(&identifiers),
            Arc::clone(&matches),
        );
        let executor = MergeExecutor::new(
            Arc::clone(&entities),
            Arc::clone(&identifiers),
            Arc::clone(&matches),
            Arc::clone(&log),
            rewriter,
            Arc::new(EntityLocks::new()),
        );
        Self {
            entities,
            identifiers,
            matches,
            generator,
            queue,
            executor,
            log,
            config,
        }
    }

    /// Fully in-memory engine with default scoring. The common test
    /// and embedded setup.
    #[must_use]
    pub fn in_memory(rewriter: ReferenceRewriter) -> Self {
        Self::new(
            Arc::new(InMemoryEntityStore::new()),
            Arc::new(InMemoryIdentifierStore::new()),
            Arc::new(InMemoryMatchStore::new()),
            Arc::new(InMemoryMergeLog::new()),
            Arc::new(rewriter),
            ScoringConfig::default(),
        )
    }

    /// Ingest an identifier observation from a source system.
    ///
    /// When `entity_id` is given the identifier is attached to that
    /// entity; a tuple collision with another entity surfaces as
    /// `Conflict` and queues the pair for review, since two entities
    /// claiming the same tuple is itself match evidence. Without an
    /// `entity_id`, an existing owner of the
    /// tuple is reused, or a new canonical entity is created and seeded
    /// from the value. Either way a scoped candidate scan runs after
    /// the write.
    pub fn upsert_identifier(
        &self,
        source: SourceSystem,
        kind: IdentifierKind,
        value: &str,
        entity_id: Option<EntityId>,
    ) -> EngineResult<IngestOutcome> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyIdentifierValue.into());
        }
        if kind == IdentifierKind::Email && !normalize::is_plausible_email(trimmed) {
            return Err(ValidationError::MalformedEmail {
                value: trimmed.to_string(),
            }
            .into());
        }

        let (entity_id, created_entity) = match entity_id {
            Some(id) => {
                if self.entities.get(id)?.is_none() {
                    return Err(NotFoundError::Entity(id).into());
                }
                (id, false)
            }
            None => {
                let probe = Identifier::new(EntityId::new(), source.clone(), kind.clone(), trimmed);
                match self.identifiers.find_by_key(&probe.key())? {
                    Some(existing) => (existing.entity_id, false),
                    None => {
                        let entity = seed_entity(&kind, trimmed);
                        let id = entity.id;
                        self.entities.insert(entity)?;
                        (id, true)
                    }
                }
            }
        };

        let row = Identifier::new(entity_id, source, kind, trimmed);
        let identifier_id = match self.identifiers.insert(row) {
            Ok(id) => id,
            Err(StorageError::DuplicateTuple { key, owner }) => {
                // Two entities claiming the same tuple is match evidence
                // in its own right; queue the pair before reporting.
                if !self.matches.pair_exists(entity_id, owner)? {
                    self.matches.insert(PotentialMatch::new(
                        entity_id,
                        owner,
                        self.config.exact_match_weight,
                    ))?;
                }
                return Err(EngineError::Conflict {
                    key: key.to_string(),
                    owner,
                });
            }
            Err(e) => return Err(e.into()),
        };

        let report = self.generator.scan_entity(entity_id)?;
        Ok(IngestOutcome {
            entity_id,
            identifier_id,
            created_entity,
            matches_proposed: report.proposed,
        })
    }

    /// Propose matches across the whole store.
    pub fn scan_all(&self) -> EngineResult<ScanReport> {
        self.generator.scan_all()
    }

    /// Spawn a background scan worker over this engine's stores.
    ///
    /// Ingest paths that cannot afford the synchronous post-write scan
    /// enqueue entity ids here instead.
    #[must_use]
    pub fn scan_worker(&self, config: ScanWorkerConfig) -> ScanWorker {
        ScanWorker::new(
            Arc::clone(&self.identifiers),
            Arc::clone(&self.matches),
            self.config,
            config,
        )
    }

    /// `GET /matches`.
    pub fn list_matches(&self, req: &ListMatchesRequest) -> EngineResult<ListMatchesResponse> {
        let page = self.queue.list(req.status, req.min_score, req.limit)?;
        Ok(ListMatchesResponse::from(&page))
    }

    /// `PATCH /matches`.
    pub fn decide(&self, req: &DecideRequest) -> EngineResult<DecideResponse> {
        self.queue
            .decide(req.match_id, req.status, req.notes.as_deref())?;
        let item = self.queue.item(req.match_id)?;
        Ok(DecideResponse {
            ok: true,
            decided: MatchView::from(&item),
        })
    }

    /// `POST /merge`.
    pub fn merge(&self, req: &MergeRequest, actor: &str) -> EngineResult<MergeResponse> {
        let outcome = self.executor.merge(
            req.keep_entity_id,
            req.merge_entity_id,
            req.match_id,
            actor,
        )?;
        Ok(MergeResponse::from(&outcome))
    }

    /// Replay an interrupted merge from its log entry.
    pub fn resume(&self, log_id: MergeLogId) -> EngineResult<MergeOutcome> {
        self.executor.resume(log_id)
    }

    /// Fetch an entity. Downstream consumers treat a miss as "merged
    /// away" and re-resolve through lineage.
    pub fn entity(&self, id: EntityId) -> EngineResult<CanonicalEntity> {
        Ok(self.entities.get(id)?.ok_or(NotFoundError::Entity(id))?)
    }

    /// Merge log entries naming the entity as kept or absorbed.
    pub fn merge_history(&self, entity_id: EntityId) -> EngineResult<Vec<MergeLogEntry>> {
        Ok(self.log.entries_for(entity_id)?)
    }

    /// Error body plus HTTP status for an engine error.
    #[must_use]
    pub fn error_response(err: &EngineError) -> (u16, ErrorBody) {
        (err.http_status(), ErrorBody::from(err))
    }
}

/// A brand-new entity seeded with the canonical field matching the
/// identifier that created it.
fn seed_entity(kind: &IdentifierKind, value: &str) -> CanonicalEntity {
    let mut entity = CanonicalEntity::new();
    match kind {
        IdentifierKind::Email => entity.email = Some(value.to_string()),
        IdentifierKind::Phone => entity.phone = Some(value.to_string()),
        IdentifierKind::CompanyName => entity.company_name = Some(value.to_string()),
        IdentifierKind::Custom(_) => {}
    }
    entity
}
