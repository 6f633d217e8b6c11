//! The store context: layers, collaborators and the transactions run on them.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use graphcache_core::record::{ClientIdGenerator, DataId, RootCallKey};
use graphcache_core::{AppConfig, CacheManager, DiskCache, Error};
use serde_json::Value;

use crate::change::ChangeSet;
use crate::deferred::DeferredQueryTracker;
use crate::gc::GarbageCollector;
use crate::query::{RootArg, RootQuery};
use crate::store::{MutationId, RecordStore, StoreLayers, StoreView};
use crate::writer::{QueryWriter, WriterOptions};

/// Receives the ids whose data changed after each transaction.
pub trait ChangeEmitter {
    fn broadcast_change_for_id(&self, id: &DataId);
}

impl<F> ChangeEmitter for F
where
    F: Fn(&DataId),
{
    fn broadcast_change_for_id(&self, id: &DataId) {
        self(id)
    }
}

/// Owns every layer of one cache plus the garbage collector and deferred
/// query tracker.
///
/// All methods run to completion before returning, so a sweep or a change
/// broadcast never observes a half-written payload.
pub struct StoreData {
    layers: StoreLayers,
    gc: Option<GarbageCollector>,
    deferred: DeferredQueryTracker,
    emitter: Option<Box<dyn ChangeEmitter>>,
    cache_loaded: bool,
    force_index: u64,
}

impl fmt::Debug for StoreData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreData")
            .field("layers", &self.layers)
            .field("gc", &self.gc)
            .field("deferred", &self.deferred)
            .field("cache_loaded", &self.cache_loaded)
            .field("force_index", &self.force_index)
            .finish_non_exhaustive()
    }
}

impl Default for StoreData {
    fn default() -> Self {
        Self::new(ClientIdGenerator::default())
    }
}

impl StoreData {
    pub fn new(client_ids: ClientIdGenerator) -> Self {
        Self {
            layers: StoreLayers::new(client_ids),
            gc: None,
            deferred: DeferredQueryTracker::new(),
            emitter: None,
            cache_loaded: false,
            force_index: 0,
        }
    }

    /// Build a context from configuration, loading the disk cache if enabled.
    pub async fn open(config: &AppConfig) -> Result<Self, Error> {
        let mut data = Self::new(ClientIdGenerator::new(config.client_id_prefix.as_str()));
        if config.gc_enabled {
            data.initialize_garbage_collector()?;
        }
        if config.disk_cache_enabled {
            let cache = DiskCache::open(&config.db_path).await?;
            data.layers.cache_manager = Some(Arc::new(cache));
            data.read_from_disk_cache().await?;
        }
        Ok(data)
    }

    pub fn with_cache_manager(mut self, manager: Arc<dyn CacheManager>) -> Self {
        self.layers.cache_manager = Some(manager);
        self
    }

    pub fn with_change_emitter(mut self, emitter: impl ChangeEmitter + 'static) -> Self {
        self.emitter = Some(Box::new(emitter));
        self
    }

    pub fn layers(&self) -> &StoreLayers {
        &self.layers
    }

    /// Load the persistent cache into the cached layer. Runs at most once;
    /// later calls return `false`.
    pub async fn read_from_disk_cache(&mut self) -> Result<bool, Error> {
        let Some(manager) = self.layers.cache_manager.clone() else {
            return Ok(false);
        };
        if self.cache_loaded {
            return Ok(false);
        }
        let data = manager.read_all_data().await?;
        tracing::debug!(
            records = data.records.len(),
            root_calls = data.root_calls.len(),
            "loaded persistent cache"
        );
        self.layers.cached.extend(data.records);
        self.layers.cached_root_calls.extend(data.root_calls);
        self.cache_loaded = true;
        Ok(true)
    }

    /// Confirmed data only.
    pub fn record_store(&mut self) -> RecordStore<'_> {
        RecordStore::new(&mut self.layers, StoreView::Base)
    }

    /// Confirmed data, falling back to the persistent cache.
    pub fn cached_store(&mut self) -> RecordStore<'_> {
        RecordStore::new(&mut self.layers, StoreView::Cached)
    }

    /// Writes land in the overlay of `mutation_id`; reads see every overlay.
    pub fn queued_store(&mut self, mutation_id: &MutationId) -> RecordStore<'_> {
        RecordStore::new(&mut self.layers, StoreView::Queued(mutation_id.clone()))
    }

    pub fn next_force_index(&mut self) -> u64 {
        self.force_index += 1;
        self.force_index
    }

    /// Write a server response into the base layer.
    pub fn handle_query_payload(
        &mut self,
        query: &RootQuery,
        payload: &Value,
        force_index: Option<u64>,
    ) -> Result<ChangeSet, Error> {
        let options = WriterOptions { force_index: force_index.unwrap_or(0), optimistic: false };
        let mut writer = QueryWriter::new(self.cached_store(), options);
        let written = writer.write_payload(query, payload);
        let changes = writer.into_change_set();

        // records created before a failure stay in base and must stay collectable
        if let Some(gc) = self.gc.as_mut() {
            for id in &changes.created {
                gc.register(id);
            }
        }
        written?;

        self.learn_root_calls(query);
        self.broadcast_changes(changes.updated.iter());
        if self.gc.as_mut().is_some_and(GarbageCollector::take_collection_request) {
            self.collect_garbage();
        }
        Ok(changes)
    }

    /// Write an optimistic response into the overlay of `mutation_id`.
    pub fn handle_optimistic_payload(
        &mut self,
        mutation_id: &MutationId,
        query: &RootQuery,
        payload: &Value,
    ) -> Result<ChangeSet, Error> {
        let options = WriterOptions { force_index: 0, optimistic: true };
        let mut writer = QueryWriter::new(self.queued_store(mutation_id), options);
        writer.write_payload(query, payload)?;
        let changes = writer.into_change_set();
        self.broadcast_changes(changes.updated.iter().chain(&changes.created));
        Ok(changes)
    }

    /// Drop the overlay of `mutation_id`, returning the ids it touched.
    pub fn clear_queued_data(&mut self, mutation_id: &MutationId) -> Vec<DataId> {
        let Some(records) = self.layers.remove_queued(mutation_id) else {
            return Vec::new();
        };
        let ids: BTreeSet<DataId> = records.into_keys().collect();
        self.broadcast_changes(ids.iter());
        ids.into_iter().collect()
    }

    fn broadcast_changes<'i>(&self, ids: impl Iterator<Item = &'i DataId>) {
        if let Some(emitter) = &self.emitter {
            for id in ids {
                emitter.broadcast_change_for_id(id);
            }
        }
    }

    /// Hand newly learned root-call identities to the deferred tracker.
    fn learn_root_calls(&mut self, query: &RootQuery) {
        if query.root_call.is_node_call() || matches!(query.root_call.arg, RootArg::Ref(_)) {
            return;
        }
        for key in query.root_call.keys() {
            if let Some(id) = self.layers.root_calls.get(&key) {
                self.deferred.resolve_root_call(&key, id);
            }
        }
    }

    /// Start collecting unreachable records.
    ///
    /// Refused with a warning when the base layer already holds data, since
    /// records written before tracking began could never be reclaimed.
    pub fn initialize_garbage_collector(&mut self) -> Result<bool, Error> {
        if self.gc.is_some() {
            return Err(Error::GarbageCollectorInitialized);
        }
        if !self.layers.base.is_empty() {
            tracing::warn!(records = self.layers.base.len(), "garbage collector initialized on a non-empty store");
            return Ok(false);
        }
        self.gc = Some(GarbageCollector::new());
        Ok(true)
    }

    pub fn garbage_collector_mut(&mut self) -> Option<&mut GarbageCollector> {
        self.gc.as_mut()
    }

    /// Sweep now; returns the deleted ids.
    pub fn collect_garbage(&mut self) -> Vec<DataId> {
        let Some(gc) = self.gc.as_mut() else {
            return Vec::new();
        };
        let mut store = RecordStore::new(&mut self.layers, StoreView::Base);
        let collected = gc.collect(&mut store);
        if !collected.is_empty() {
            tracing::debug!(count = collected.len(), "collected unreachable records");
        }
        collected
    }

    pub fn deferred_tracker(&mut self) -> &mut DeferredQueryTracker {
        &mut self.deferred
    }

    /// Track `query` with root ids resolved against the current root calls.
    pub fn record_deferred_query(&mut self, query: &RootQuery) -> Result<(), Error> {
        let layers = &self.layers;
        let node_call = query.root_call.is_node_call();
        self.deferred.record_query(query, |key: &RootCallKey| {
            if node_call {
                return key.arg.as_deref().map(DataId::from);
            }
            layers.root_calls.get(key).or_else(|| layers.cached_root_calls.get(key)).cloned()
        })
    }
}
