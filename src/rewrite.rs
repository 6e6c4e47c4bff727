//! Dependent-reference rewriting.
//!
//! Entities are referenced from outside the resolution core: activity
//! rows, notes, scheduled follow-ups. When a merge absorbs an entity,
//! every such reference must be repointed at the kept entity before the
//! absorbed row is deleted, or it dangles.
//!
//! The set of dependent tables is a closed registry fixed at
//! construction. Nothing discovers tables at runtime; adding a new
//! dependent table means registering it where the engine is wired up.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::entity::EntityId;
use crate::storage::StorageError;

/// A table holding references to canonical entities.
///
/// Implementations must make `rewrite` idempotent: repointing from an
/// entity that no longer appears is a zero-count no-op, which is what
/// merge replay relies on.
pub trait DependentTable: Send + Sync {
    /// Stable name for logging and rewrite accounting.
    fn name(&self) -> &str;

    /// Repoint every reference from `from` to `to`. Returns the number
    /// of references rewritten.
    fn rewrite(&self, from: EntityId, to: EntityId) -> Result<usize, StorageError>;

    /// Number of references currently pointing at the entity.
    fn count_for(&self, entity_id: EntityId) -> Result<usize, StorageError>;
}

impl<T: DependentTable + ?Sized> DependentTable for std::sync::Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn rewrite(&self, from: EntityId, to: EntityId) -> Result<usize, StorageError> {
        (**self).rewrite(from, to)
    }

    fn count_for(&self, entity_id: EntityId) -> Result<usize, StorageError> {
        (**self).count_for(entity_id)
    }
}

/// Closed registry of dependent tables.
///
/// Tables are visited in registration order. A failure in one table
/// stops the pass and surfaces the error; already-rewritten tables stay
/// rewritten, and a later replay of the same merge finds zero rows left
/// to repoint in them.
#[derive(Default)]
pub struct ReferenceRewriter {
    tables: Vec<Box<dyn DependentTable>>,
}

impl ReferenceRewriter {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a dependent table. Order of registration is the order
    /// tables are rewritten in.
    #[must_use]
    pub fn with_table(mut self, table: Box<dyn DependentTable>) -> Self {
        self.tables.push(table);
        self
    }

    /// Number of registered tables.
    #[must_use]
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Repoint all references from `from` to `to` across every
    /// registered table. Returns the total rewritten count.
    pub fn rewrite_all(&self, from: EntityId, to: EntityId) -> Result<usize, StorageError> {
        let mut total = 0;
        for table in &self.tables {
            total += table.rewrite(from, to)?;
        }
        Ok(total)
    }

    /// Total references to the entity across every registered table.
    pub fn count_for(&self, entity_id: EntityId) -> Result<usize, StorageError> {
        let mut total = 0;
        for table in &self.tables {
            total += table.count_for(entity_id)?;
        }
        Ok(total)
    }
}

/// In-memory dependent table: a named bag of rows each pointing at one
/// entity. Used in tests and embedded setups.
pub struct InMemoryDependentTable {
    name: String,
    refs: RwLock<HashMap<u64, EntityId>>,
}

impl InMemoryDependentTable {
    /// Create an empty table with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            refs: RwLock::new(HashMap::new()),
        }
    }

    /// Add a row referencing the entity.
    pub fn add_reference(&self, row_id: u64, entity_id: EntityId) -> Result<(), StorageError> {
        let mut refs = self
            .refs
            .write()
            .map_err(|_| StorageError::BackendError("dependent table lock poisoned".to_string()))?;
        refs.insert(row_id, entity_id);
        Ok(())
    }

    /// Entity a row currently points at.
    pub fn reference(&self, row_id: u64) -> Result<Option<EntityId>, StorageError> {
        let refs = self
            .refs
            .read()
            .map_err(|_| StorageError::BackendError("dependent table lock poisoned".to_string()))?;
        Ok(refs.get(&row_id).copied())
    }
}

impl DependentTable for InMemoryDependentTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn rewrite(&self, from: EntityId, to: EntityId) -> Result<usize, StorageError> {
        let mut refs = self
            .refs
            .write()
            .map_err(|_| StorageError::BackendError("dependent table lock poisoned".to_string()))?;
        let mut rewritten = 0;
        for target in refs.values_mut() {
            if *target == from {
                *target = to;
                rewritten += 1;
            }
        }
        Ok(rewritten)
    }

    fn count_for(&self, entity_id: EntityId) -> Result<usize, StorageError> {
        let refs = self
            .refs
            .read()
            .map_err(|_| StorageError::BackendError("dependent table lock poisoned".to_string()))?;
        Ok(refs.values().filter(|t| **t == entity_id).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_rewrite_repoints_only_matching_rows() {
        let table = InMemoryDependentTable::new("activities");
        let a = EntityId::new();
        let b = EntityId::new();
        let c = EntityId::new();
        table.add_reference(1, a).unwrap();
        table.add_reference(2, a).unwrap();
        table.add_reference(3, c).unwrap();

        assert_eq!(table.rewrite(a, b).unwrap(), 2);
        assert_eq!(table.reference(1).unwrap(), Some(b));
        assert_eq!(table.reference(2).unwrap(), Some(b));
        assert_eq!(table.reference(3).unwrap(), Some(c));

        // Replay finds nothing left to do.
        assert_eq!(table.rewrite(a, b).unwrap(), 0);
    }

    #[test]
    fn test_registry_totals_across_tables() {
        let activities = Arc::new(InMemoryDependentTable::new("activities"));
        let notes = Arc::new(InMemoryDependentTable::new("notes"));
        let a = EntityId::new();
        let b = EntityId::new();
        activities.add_reference(1, a).unwrap();
        notes.add_reference(1, a).unwrap();
        notes.add_reference(2, a).unwrap();

        let rewriter = ReferenceRewriter::new()
            .with_table(Box::new(Arc::clone(&activities)))
            .with_table(Box::new(Arc::clone(&notes)));

        assert_eq!(rewriter.table_count(), 2);
        assert_eq!(rewriter.count_for(a).unwrap(), 3);
        assert_eq!(rewriter.rewrite_all(a, b).unwrap(), 3);
        assert_eq!(rewriter.count_for(a).unwrap(), 0);
        assert_eq!(rewriter.count_for(b).unwrap(), 3);
    }

    #[test]
    fn test_empty_registry_rewrites_zero() {
        let rewriter = ReferenceRewriter::new();
        assert_eq!(
            rewriter.rewrite_all(EntityId::new(), EntityId::new()).unwrap(),
            0
        );
    }
}
