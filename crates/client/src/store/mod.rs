//! Layered record storage.
//!
//! A [`RecordStore`] is a short-lived view over [`StoreLayers`]. The view is
//! fixed at construction and decides both where reads look and where writes
//! land:
//!
//! | view          | reads (highest priority first)      | writes to        |
//! |---------------|-------------------------------------|------------------|
//! | `Base`        | base                                | base             |
//! | `Cached`      | base, cached                        | base             |
//! | `Queued(id)`  | every queued overlay, base, cached  | overlay `id`     |
//!
//! Reads resolve field by field: a layer that has the record but not the
//! field falls through to the next layer, while a layer that deleted the
//! record hides everything below it. Base writes are mirrored to the
//! [`CacheManager`](graphcache_core::cache::CacheManager), if one is
//! installed; queued writes never are.

use graphcache_core::Error;
use graphcache_core::cache::CacheManager;
use graphcache_core::record::{DataId, FieldValue, Record, RecordMap, RecordStatus};

mod layers;
mod range;
mod root_calls;

pub use layers::{MutationId, StoreLayers};
pub use range::{EdgeRef, RangeMetadata};
pub use root_calls::{NODE_CALL, NODES_CALL};

/// Which layers a [`RecordStore`] reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreView {
    /// Server-confirmed records only.
    Base,
    /// Base records backed by records read from the persistent cache.
    Cached,
    /// Everything, with writes isolated in one mutation's overlay.
    Queued(MutationId),
}

/// Priority-resolving façade over the store layers.
#[derive(Debug)]
pub struct RecordStore<'a> {
    layers: &'a mut StoreLayers,
    view: StoreView,
}

impl<'a> RecordStore<'a> {
    /// Borrow `layers` through `view`.
    pub fn new(layers: &'a mut StoreLayers, view: StoreView) -> Self {
        Self { layers, view }
    }

    pub fn view(&self) -> &StoreView {
        &self.view
    }

    /// True when writes land in a queued overlay instead of base.
    pub fn is_optimistic(&self) -> bool {
        matches!(self.view, StoreView::Queued(_))
    }

    fn read_layers(&self) -> Vec<&RecordMap> {
        let layers = &*self.layers;
        let mut maps = Vec::with_capacity(layers.queued.len() + 2);
        if self.is_optimistic() {
            maps.extend(layers.queued.iter().rev().map(|(_, records)| records));
        }
        maps.push(&layers.base);
        if self.view != StoreView::Base {
            maps.push(&layers.cached);
        }
        maps
    }

    fn target_mut(&mut self) -> &mut RecordMap {
        match &self.view {
            StoreView::Queued(mutation_id) => self.layers.queued_mut(mutation_id),
            StoreView::Base | StoreView::Cached => &mut self.layers.base,
        }
    }

    /// The target layer's copy of `id`, created empty if the layer lacks one.
    fn target_record_mut(&mut self, id: &DataId) -> &mut Record {
        self.target_mut()
            .entry(id.clone())
            .or_insert(None)
            .get_or_insert_with(|| Record::new(id.clone()))
    }

    fn cache_manager(&self) -> Option<&dyn CacheManager> {
        if self.is_optimistic() { None } else { self.layers.cache_manager.as_deref() }
    }

    fn lookup_field(&self, id: &DataId, key: &str) -> Option<&FieldValue> {
        for records in self.read_layers() {
            match records.get(id) {
                Some(Some(record)) => {
                    if let Some(value) = record.fields.get(key) {
                        return Some(value);
                    }
                }
                Some(None) => return None,
                None => {}
            }
        }
        None
    }

    fn ensure_exists(&self, id: &DataId) -> Result<(), Error> {
        match self.get_record_status(id) {
            RecordStatus::Existent => Ok(()),
            _ => Err(Error::RecordMissing(id.clone())),
        }
    }

    /// Status from the first layer that knows `id`, newest first.
    pub fn get_record_status(&self, id: &DataId) -> RecordStatus {
        for records in self.read_layers() {
            match records.get(id) {
                Some(Some(_)) => return RecordStatus::Existent,
                Some(None) => return RecordStatus::Nonexistent,
                None => {}
            }
        }
        RecordStatus::Unknown
    }

    /// Create an empty record in the write layer unless it already has one.
    ///
    /// A record that already exists in a lower layer only gets an empty copy
    /// in the write layer; its fields keep falling through and the persisted
    /// copy is left as is.
    pub fn put_record(&mut self, id: &DataId) {
        if matches!(self.target_mut().get(id), Some(Some(_))) {
            return;
        }
        let existed = self.get_record_status(id) == RecordStatus::Existent;
        let record = Record::new(id.clone());
        if !existed && let Some(cache) = self.cache_manager() {
            cache.cache_node(id, Some(&record));
        }
        self.target_mut().insert(id.clone(), Some(record));
    }

    /// Tombstone `id` in the write layer.
    ///
    /// Base deletes also drop the record from the node to connection index.
    pub fn delete_record(&mut self, id: &DataId) {
        self.target_mut().insert(id.clone(), None);
        if !self.is_optimistic() {
            self.layers.forget_connections(id);
        }
        if let Some(cache) = self.cache_manager() {
            cache.cache_node(id, None);
        }
    }

    /// Field value as seen through this view; `None` when undefined.
    ///
    /// # Errors
    ///
    /// Returns `RecordMissing` unless the record exists in this view.
    pub fn get_field(&self, id: &DataId, key: &str) -> Result<Option<&FieldValue>, Error> {
        self.ensure_exists(id)?;
        Ok(self.lookup_field(id, key))
    }

    /// Write a field value into the write layer.
    ///
    /// # Errors
    ///
    /// Returns `RecordMissing` unless the record exists in this view.
    pub fn put_field(&mut self, id: &DataId, key: &str, value: FieldValue) -> Result<(), Error> {
        self.ensure_exists(id)?;
        if let Some(cache) = self.cache_manager() {
            cache.cache_field(id, key, Some(&value));
        }
        self.target_record_mut(id).fields.insert(key.to_string(), value);
        Ok(())
    }

    /// Set a field to null.
    pub fn delete_field(&mut self, id: &DataId, key: &str) -> Result<(), Error> {
        self.put_field(id, key, FieldValue::null())
    }

    /// Make a field undefined in the write layer so reads fall through again.
    pub fn unset_field(&mut self, id: &DataId, key: &str) -> Result<(), Error> {
        self.ensure_exists(id)?;
        if let Some(Some(record)) = self.target_mut().get_mut(id) {
            record.fields.remove(key);
        }
        if let Some(cache) = self.cache_manager() {
            cache.cache_field(id, key, None);
        }
        Ok(())
    }

    /// Id stored in a singular link field; `None` when undefined or null.
    ///
    /// # Errors
    ///
    /// Returns `RecordMissing` for an absent record and `InvalidPayload` when
    /// the field holds something other than a link.
    pub fn get_linked_record_id(&self, id: &DataId, key: &str) -> Result<Option<&DataId>, Error> {
        match self.get_field(id, key)? {
            None => Ok(None),
            Some(FieldValue::Link(target)) => Ok(Some(target)),
            Some(value) if value.is_null() => Ok(None),
            Some(_) => Err(Error::InvalidPayload(format!("field `{key}` of `{id}` is not a linked record"))),
        }
    }

    /// Link `id.key` to `target`.
    ///
    /// # Errors
    ///
    /// Returns `LinkTargetMissing` unless both records exist in this view.
    pub fn put_linked_record_id(&mut self, id: &DataId, key: &str, target: &DataId) -> Result<(), Error> {
        self.ensure_linkable(id, key, target)?;
        self.put_field(id, key, FieldValue::Link(target.clone()))
    }

    /// # Errors
    ///
    /// Returns `RecordMissing` for an absent record and `InvalidPayload` when
    /// the field holds something other than a link list.
    pub fn get_linked_record_ids(&self, id: &DataId, key: &str) -> Result<Option<&[DataId]>, Error> {
        match self.get_field(id, key)? {
            None => Ok(None),
            Some(FieldValue::Links(targets)) => Ok(Some(targets)),
            Some(value) if value.is_null() => Ok(None),
            Some(_) => Err(Error::InvalidPayload(format!("field `{key}` of `{id}` is not a linked record list"))),
        }
    }

    /// Replace a plural link field with `targets`, in order.
    ///
    /// # Errors
    ///
    /// Returns `LinkTargetMissing` if the record or any target is absent.
    pub fn put_linked_record_ids(&mut self, id: &DataId, key: &str, targets: Vec<DataId>) -> Result<(), Error> {
        for target in &targets {
            self.ensure_linkable(id, key, target)?;
        }
        self.put_field(id, key, FieldValue::Links(targets))
    }

    fn ensure_linkable(&self, id: &DataId, key: &str, target: &DataId) -> Result<(), Error> {
        let both_exist = self.get_record_status(id) == RecordStatus::Existent
            && self.get_record_status(target) == RecordStatus::Existent;
        if both_exist {
            Ok(())
        } else {
            Err(Error::LinkTargetMissing { record: id.clone(), field: key.to_string(), target: target.clone() })
        }
    }

    /// Every id referenced by `id` as seen through this view.
    pub fn linked_ids(&self, id: &DataId) -> Vec<DataId> {
        let mut linked: Vec<DataId> = Vec::new();
        let mut seen_fields = std::collections::HashSet::new();
        for records in self.read_layers() {
            match records.get(id) {
                Some(Some(record)) => {
                    for (key, value) in &record.fields {
                        if seen_fields.insert(key.as_str()) {
                            linked.extend(value.linked_ids().into_iter().cloned());
                        }
                    }
                }
                Some(None) => break,
                None => {}
            }
        }
        linked
    }

    /// Mint a fresh `client:` id for a record the server has not named.
    pub fn generate_client_id(&mut self) -> DataId {
        self.layers.client_ids.generate()
    }

    /// Deterministic edge id for `node_id` within a connection.
    pub fn edge_id(&self, connection_id: &DataId, node_id: &DataId) -> DataId {
        self.layers.client_ids.edge_id(connection_id, node_id)
    }

    pub fn is_client_id(&self, id: &DataId) -> bool {
        self.layers.client_ids.is_client_id(id)
    }
}
