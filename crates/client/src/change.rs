//! Per-transaction change accumulation.

use std::collections::BTreeSet;

use graphcache_core::record::DataId;

/// Ids created and updated by one write transaction.
///
/// An id is in at most one of the two sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub created: BTreeSet<DataId>,
    pub updated: BTreeSet<DataId>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct ChangeTracker {
    changes: ChangeSet,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `id` as created, dropping any earlier update mark.
    pub fn create_id(&mut self, id: &DataId) {
        self.changes.updated.remove(id);
        self.changes.created.insert(id.clone());
    }

    /// Ignored for ids created in the same transaction.
    pub fn update_id(&mut self, id: &DataId) {
        if !self.changes.created.contains(id) {
            self.changes.updated.insert(id.clone());
        }
    }

    pub fn has_change(&self, id: &DataId) -> bool {
        self.changes.created.contains(id) || self.changes.updated.contains(id)
    }

    pub fn is_new_record(&self, id: &DataId) -> bool {
        self.changes.created.contains(id)
    }

    /// Finish the transaction.
    pub fn into_change_set(self) -> ChangeSet {
        self.changes
    }
}
