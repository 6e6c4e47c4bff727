//! Review queue flows through the public API surface: listing with
//! enrichment, paging, deferral, and decision state rules.

use coalesce::api::{DecideRequest, ListMatchesRequest, MergeRequest};
use coalesce::{
    EngineError, EntityId, IdentifierKind, MatchStatus, ReferenceRewriter, ResolutionEngine,
    ReviewDecision, ScoreBand, SourceSystem,
};

fn engine() -> ResolutionEngine {
    ResolutionEngine::in_memory(ReferenceRewriter::new())
}

fn ingest(engine: &ResolutionEngine, source: SourceSystem, value: &str) -> EntityId {
    engine
        .upsert_identifier(source, IdentifierKind::Email, value, None)
        .unwrap()
        .entity_id
}

/// Strong pair {a,b} on a shared cross-source email, weaker pair {b,c}
/// on a shared cross-source phone with disagreeing emails.
fn seeded_queue(engine: &ResolutionEngine) -> (EntityId, EntityId, EntityId) {
    let a = ingest(engine, SourceSystem::Crm, "jo@acme.com");
    let b = ingest(engine, SourceSystem::Accounting, "jo@acme.com");
    let c = engine
        .upsert_identifier(SourceSystem::Crm, IdentifierKind::Phone, "555-0100", None)
        .unwrap()
        .entity_id;
    engine
        .upsert_identifier(SourceSystem::Crm, IdentifierKind::Email, "flo@other.com", Some(c))
        .unwrap();
    // The same phone surfaces on b through accounting, with different
    // formatting.
    let attached = engine
        .upsert_identifier(
            SourceSystem::Accounting,
            IdentifierKind::Phone,
            "(555) 0100",
            Some(b),
        )
        .unwrap();
    assert_eq!(attached.matches_proposed, 1);
    (a, b, c)
}

#[test]
fn listing_is_enriched_and_ordered_by_score() {
    let engine = engine();
    let (a, _b, c) = seeded_queue(&engine);

    let page = engine.list_matches(&ListMatchesRequest::default()).unwrap();
    assert_eq!(page.pending_total, 2);
    assert!(page.matches[0].score >= page.matches[1].score);

    // The strong pair spans two source systems; the view says so.
    let strong = &page.matches[0];
    assert!(strong.entity_a == a || strong.entity_b == a);
    assert_eq!(strong.band, ScoreBand::Strong);
    let mut sources: Vec<String> = strong
        .sources_a
        .iter()
        .chain(strong.sources_b.iter())
        .cloned()
        .collect();
    sources.sort();
    sources.dedup();
    assert!(sources.contains(&"crm".to_string()));
    assert!(sources.contains(&"accounting".to_string()));

    // Shared phone, conflicting emails: proposed, but a band down.
    let weak = &page.matches[1];
    assert!(weak.entity_a == c || weak.entity_b == c);
    assert_eq!(weak.band, ScoreBand::Probable);
}

#[test]
fn min_score_and_limit_page_the_queue() {
    let engine = engine();
    seeded_queue(&engine);

    let page = engine
        .list_matches(&ListMatchesRequest {
            min_score: 0.8,
            limit: 10,
            ..ListMatchesRequest::default()
        })
        .unwrap();
    assert_eq!(page.matches.len(), 1);
    // The total still counts everything pending.
    assert_eq!(page.pending_total, 2);

    let page = engine
        .list_matches(&ListMatchesRequest {
            min_score: 0.0,
            limit: 1,
            ..ListMatchesRequest::default()
        })
        .unwrap();
    assert_eq!(page.matches.len(), 1);
    assert_eq!(page.pending_total, 2);
}

#[test]
fn deferred_matches_keep_surfacing() {
    let engine = engine();
    ingest(&engine, SourceSystem::Crm, "jo@acme.com");
    ingest(&engine, SourceSystem::Accounting, "jo@acme.com");
    let match_id = engine
        .list_matches(&ListMatchesRequest::default())
        .unwrap()
        .matches[0]
        .match_id;

    let deferred = engine
        .decide(&DecideRequest {
            match_id,
            status: ReviewDecision::Deferred,
            notes: Some("waiting on the accounting export".to_string()),
        })
        .unwrap();
    assert_eq!(deferred.decided.status, MatchStatus::Pending);

    // Still in the queue on the next pass, notes intact.
    let page = engine.list_matches(&ListMatchesRequest::default()).unwrap();
    assert_eq!(page.pending_total, 1);
    assert_eq!(
        page.matches[0].notes.as_deref(),
        Some("waiting on the accounting export")
    );
}

#[test]
fn rejected_matches_leave_the_queue_for_good() {
    let engine = engine();
    let a = ingest(&engine, SourceSystem::Crm, "jo@acme.com");
    ingest(&engine, SourceSystem::Accounting, "jo@acme.com");
    let match_id = engine
        .list_matches(&ListMatchesRequest::default())
        .unwrap()
        .matches[0]
        .match_id;

    engine
        .decide(&DecideRequest {
            match_id,
            status: ReviewDecision::Rejected,
            notes: Some("different people".to_string()),
        })
        .unwrap();
    assert_eq!(
        engine
            .list_matches(&ListMatchesRequest::default())
            .unwrap()
            .pending_total,
        0
    );

    // New identifier activity on the pair does not resurrect it.
    engine
        .upsert_identifier(
            SourceSystem::Communications,
            IdentifierKind::Email,
            "jo@acme.com",
            Some(a),
        )
        .unwrap();
    assert_eq!(
        engine
            .list_matches(&ListMatchesRequest::default())
            .unwrap()
            .pending_total,
        0
    );
}

#[test]
fn approvals_are_revocable_until_the_merge_runs() {
    let engine = engine();
    ingest(&engine, SourceSystem::Crm, "jo@acme.com");
    ingest(&engine, SourceSystem::Accounting, "jo@acme.com");
    let match_id = engine
        .list_matches(&ListMatchesRequest::default())
        .unwrap()
        .matches[0]
        .match_id;

    engine
        .decide(&DecideRequest {
            match_id,
            status: ReviewDecision::Approved,
            notes: None,
        })
        .unwrap();

    // No merge has consumed the approval, so the reviewer can walk it
    // back.
    let revoked = engine
        .decide(&DecideRequest {
            match_id,
            status: ReviewDecision::Rejected,
            notes: Some("accounting row was a transposed import".to_string()),
        })
        .unwrap();
    assert_eq!(revoked.decided.status, MatchStatus::Rejected);
}

#[test]
fn approved_intents_are_listable_before_merge() {
    let engine = engine();
    seeded_queue(&engine);
    let strong_id = engine
        .list_matches(&ListMatchesRequest::default())
        .unwrap()
        .matches[0]
        .match_id;

    engine
        .decide(&DecideRequest {
            match_id: strong_id,
            status: ReviewDecision::Approved,
            notes: None,
        })
        .unwrap();

    let approved = engine
        .list_matches(&ListMatchesRequest {
            status: MatchStatus::Approved,
            ..ListMatchesRequest::default()
        })
        .unwrap();
    assert_eq!(approved.matches.len(), 1);
    assert_eq!(approved.matches[0].match_id, strong_id);
    assert_eq!(approved.matches[0].status, MatchStatus::Approved);
    // The weaker pair is still what the pending queue shows.
    let pending = engine.list_matches(&ListMatchesRequest::default()).unwrap();
    assert_eq!(pending.matches.len(), 1);
    assert_eq!(pending.pending_total, 1);
}

#[test]
fn deciding_a_merged_match_is_rejected() {
    let engine = engine();
    let a = ingest(&engine, SourceSystem::Crm, "jo@acme.com");
    let b = ingest(&engine, SourceSystem::Accounting, "jo@acme.com");
    let match_id = engine
        .list_matches(&ListMatchesRequest::default())
        .unwrap()
        .matches[0]
        .match_id;

    engine
        .decide(&DecideRequest {
            match_id,
            status: ReviewDecision::Approved,
            notes: None,
        })
        .unwrap();
    engine
        .merge(
            &MergeRequest {
                keep_entity_id: a,
                merge_entity_id: b,
                match_id: Some(match_id),
            },
            "reviewer",
        )
        .unwrap();

    let err = engine
        .decide(&DecideRequest {
            match_id,
            status: ReviewDecision::Rejected,
            notes: None,
        })
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidState {
            status: MatchStatus::Merged,
            ..
        }
    ));
    assert_eq!(err.http_status(), 400);
}
