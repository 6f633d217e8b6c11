//! Reachability-based garbage collection of the base layer.
//!
//! Roots are reference counted by whoever holds subscriptions. Only records
//! reported as created by a write transaction are tracked, so data read from
//! the persistent cache is never collected.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use graphcache_core::record::{DataId, RecordStatus};

use crate::store::RecordStore;

#[derive(Debug, Default)]
pub struct GarbageCollector {
    roots: HashMap<DataId, usize>,
    tracked: BTreeSet<DataId>,
    collection_requested: bool,
}

impl GarbageCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a newly created record.
    pub fn register(&mut self, id: &DataId) {
        self.tracked.insert(id.clone());
    }

    /// Whether `id` is a candidate for collection.
    pub fn is_tracked(&self, id: &DataId) -> bool {
        self.tracked.contains(id)
    }

    /// Pin `id` as a root while a query holds it.
    pub fn increment_reference_count(&mut self, id: &DataId) {
        *self.roots.entry(id.clone()).or_default() += 1;
    }

    /// Release one hold on `id`; the root entry goes away at zero.
    pub fn decrement_reference_count(&mut self, id: &DataId) {
        match self.roots.get_mut(id) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                self.roots.remove(id);
            }
            None => tracing::warn!(%id, "reference count decremented below zero"),
        }
    }

    pub fn reference_count(&self, id: &DataId) -> usize {
        self.roots.get(id).copied().unwrap_or(0)
    }

    /// Ask for a sweep once the current transaction finishes.
    pub fn request_collection(&mut self) {
        self.collection_requested = true;
    }

    /// Clear a pending request, returning whether one was set.
    pub fn take_collection_request(&mut self) -> bool {
        std::mem::take(&mut self.collection_requested)
    }

    /// Delete every tracked record that no root can reach.
    ///
    /// Returns the deleted ids in sorted order.
    pub fn collect(&mut self, store: &mut RecordStore<'_>) -> Vec<DataId> {
        let mut reachable: HashSet<DataId> = HashSet::new();
        let mut queue: VecDeque<DataId> = self.roots.keys().cloned().collect();
        while let Some(id) = queue.pop_front() {
            if !reachable.insert(id.clone()) {
                continue;
            }
            queue.extend(store.linked_ids(&id).into_iter().filter(|linked| !reachable.contains(linked)));
        }

        let mut collected = Vec::new();
        self.tracked.retain(|id| {
            if reachable.contains(id) {
                return true;
            }
            if store.get_record_status(id) == RecordStatus::Existent {
                store.delete_record(id);
                collected.push(id.clone());
            }
            false
        });
        tracing::debug!(collected = collected.len(), tracked = self.tracked.len(), "garbage collection finished");
        collected
    }
}

#[cfg(test)]
mod tests {
    use graphcache_core::record::FieldValue;

    use super::*;
    use crate::store::{StoreLayers, StoreView};

    fn linked_graph(layers: &mut StoreLayers) {
        let mut store = RecordStore::new(layers, StoreView::Base);
        for id in ["viewer", "actor", "friend", "orphan"] {
            store.put_record(&DataId::from(id));
        }
        store.put_linked_record_id(&DataId::from("viewer"), "actor", &DataId::from("actor")).unwrap();
        store
            .put_linked_record_ids(&DataId::from("actor"), "friends", vec![DataId::from("friend")])
            .unwrap();
        store.put_field(&DataId::from("orphan"), "name", FieldValue::Scalar("x".into())).unwrap();
    }

    #[test]
    fn test_collects_unreachable_tracked_records() {
        let mut layers = StoreLayers::default();
        linked_graph(&mut layers);
        let mut gc = GarbageCollector::new();
        for id in ["viewer", "actor", "friend", "orphan"] {
            gc.register(&DataId::from(id));
        }
        gc.increment_reference_count(&DataId::from("viewer"));

        let mut store = RecordStore::new(&mut layers, StoreView::Base);
        assert_eq!(gc.collect(&mut store), vec![DataId::from("orphan")]);
        assert_eq!(store.get_record_status(&DataId::from("orphan")), RecordStatus::Nonexistent);
        assert_eq!(store.get_record_status(&DataId::from("friend")), RecordStatus::Existent);
    }

    #[test]
    fn test_released_roots_are_collected() {
        let mut layers = StoreLayers::default();
        linked_graph(&mut layers);
        let mut gc = GarbageCollector::new();
        gc.register(&DataId::from("actor"));
        gc.register(&DataId::from("friend"));
        let viewer = DataId::from("viewer");
        gc.increment_reference_count(&viewer);
        gc.increment_reference_count(&viewer);
        gc.decrement_reference_count(&viewer);

        let mut store = RecordStore::new(&mut layers, StoreView::Base);
        assert!(gc.collect(&mut store).is_empty());

        gc.decrement_reference_count(&viewer);
        assert_eq!(gc.reference_count(&viewer), 0);
        assert_eq!(gc.collect(&mut store), vec![DataId::from("actor"), DataId::from("friend")]);
        assert!(!gc.is_tracked(&DataId::from("actor")));
    }

    #[test]
    fn test_untracked_records_survive() {
        let mut layers = StoreLayers::default();
        linked_graph(&mut layers);
        let mut gc = GarbageCollector::new();
        let mut store = RecordStore::new(&mut layers, StoreView::Base);
        assert!(gc.collect(&mut store).is_empty());
        assert_eq!(store.get_record_status(&DataId::from("orphan")), RecordStatus::Existent);
    }

    #[test]
    fn test_collection_request_is_consumed() {
        let mut gc = GarbageCollector::new();
        assert!(!gc.take_collection_request());
        gc.request_collection();
        assert!(gc.take_collection_request());
        assert!(!gc.take_collection_request());
    }
}
