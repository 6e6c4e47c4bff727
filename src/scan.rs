//! Background candidate scanning.
//!
//! Ingestion feeds are latency-sensitive, so candidate scans can be
//! pushed off the caller's thread. [`ScanWorker`] runs a dedicated
//! worker that consumes scan requests from a bounded channel; enqueue
//! is non-blocking `try_send` and never stalls the ingest path. A full
//! queue drops the request and bumps a counter instead — a dropped
//! scoped scan is always recoverable by a later full scan.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::candidate::{CandidateGenerator, ScoringConfig};
use crate::entity::EntityId;
use crate::storage::{IdentifierStore, MatchStore};

/// Scan worker configuration.
#[derive(Debug, Clone, Copy)]
pub struct ScanWorkerConfig {
    /// Max queued scan requests before they are dropped.
    pub queue_capacity: usize,
}

impl Default for ScanWorkerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
        }
    }
}

enum ScanMsg {
    Entity(EntityId),
    Full,
}

/// Dedicated worker thread running candidate scans.
pub struct ScanWorker {
    tx: Sender<ScanMsg>,
    dropped: Arc<AtomicU64>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl ScanWorker {
    /// Spawn the worker over the given stores.
    #[must_use]
    pub fn new(
        identifiers: Arc<dyn IdentifierStore>,
        matches: Arc<dyn MatchStore>,
        scoring: ScoringConfig,
        config: ScanWorkerConfig,
    ) -> Self {
        let (tx, rx) = bounded::<ScanMsg>(config.queue_capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        let generator = CandidateGenerator::new(identifiers, matches, scoring);

        let join = thread::Builder::new()
            .name("coalesce-scan".to_string())
            .spawn(move || worker_loop(&generator, &rx))
            .ok();

        Self {
            tx,
            dropped,
            join: Mutex::new(join),
        }
    }

    /// Request a scoped scan around one entity. Non-blocking; a full
    /// queue drops the request.
    pub fn enqueue(&self, entity_id: EntityId) {
        match self.tx.try_send(ScanMsg::Entity(entity_id)) {
            Ok(()) => {}
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Request a full-store scan.
    pub fn enqueue_full_scan(&self) {
        match self.tx.try_send(ScanMsg::Full) {
            Ok(()) => {}
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Scan requests dropped because the queue was full.
    #[must_use]
    pub fn dropped_requests(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for ScanWorker {
    fn drop(&mut self) {
        // Close the channel so the worker's recv loop ends, then join.
        let (dummy_tx, _) = bounded::<ScanMsg>(1);
        let old_tx = std::mem::replace(&mut self.tx, dummy_tx);
        drop(old_tx);

        if let Ok(mut guard) = self.join.lock() {
            if let Some(handle) = guard.take() {
                let _ = handle.join();
            }
        }
    }
}

fn worker_loop(generator: &CandidateGenerator, rx: &Receiver<ScanMsg>) {
    while let Ok(msg) = rx.recv() {
        // Scan failures are not fatal to the worker; the next request
        // is independent.
        let _ = match msg {
            ScanMsg::Entity(entity_id) => generator.scan_entity(entity_id),
            ScanMsg::Full => generator.scan_all(),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::{Identifier, IdentifierKind, SourceSystem};
    use crate::matching::MatchStatus;
    use crate::storage::{InMemoryIdentifierStore, InMemoryMatchStore};
    use std::time::{Duration, Instant};

    #[test]
    fn test_worker_proposes_matches_in_background() {
        let identifiers = Arc::new(InMemoryIdentifierStore::new());
        let matches = Arc::new(InMemoryMatchStore::new());
        let a = EntityId::new();
        let b = EntityId::new();
        identifiers
            .insert(Identifier::new(a, SourceSystem::Crm, IdentifierKind::Email, "jo@acme.com"))
            .unwrap();
        identifiers
            .insert(Identifier::new(
                b,
                SourceSystem::Accounting,
                IdentifierKind::Email,
                "jo@acme.com",
            ))
            .unwrap();

        let worker = ScanWorker::new(
            identifiers.clone() as Arc<dyn IdentifierStore>,
            matches.clone() as Arc<dyn MatchStore>,
            ScoringConfig::default(),
            ScanWorkerConfig::default(),
        );
        worker.enqueue(a);

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if matches.count_by_status(MatchStatus::Pending).unwrap() == 1 {
                break;
            }
            assert!(Instant::now() < deadline, "scan did not run in time");
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(worker.dropped_requests(), 0);
    }

    #[test]
    fn test_drop_joins_worker() {
        let identifiers = Arc::new(InMemoryIdentifierStore::new());
        let matches = Arc::new(InMemoryMatchStore::new());
        let worker = ScanWorker::new(
            identifiers as Arc<dyn IdentifierStore>,
            matches as Arc<dyn MatchStore>,
            ScoringConfig::default(),
            ScanWorkerConfig { queue_capacity: 4 },
        );
        worker.enqueue_full_scan();
        drop(worker);
    }
}
