//! Storage backends for the resolution engine.
//!
//! Traits define the abstract interface; in-memory implementations
//! cover embedded use and tests, and the merge journal has a durable
//! file-backed implementation.

mod journal;
mod memory;
mod traits;

pub use journal::FileMergeLog;
pub use memory::{InMemoryEntityStore, InMemoryIdentifierStore, InMemoryMatchStore, InMemoryMergeLog};
pub use traits::{
    EntityStore, IdentifierStore, MatchStore, MergeLog, ReassignOutcome, StorageError,
};
