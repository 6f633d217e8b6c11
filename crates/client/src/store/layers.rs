//! Backing maps shared by every [`RecordStore`](super::RecordStore) view.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use graphcache_core::cache::CacheManager;
use graphcache_core::record::{ClientIdGenerator, DataId, RecordMap, RootCallMap};

/// Identifies one in-flight optimistic mutation and its queued overlay.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MutationId(String);

impl MutationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MutationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// All record state owned by one store context.
#[derive(Debug, Default)]
pub struct StoreLayers {
    pub(crate) base: RecordMap,
    pub(crate) cached: RecordMap,
    /// Overlays in creation order; later overlays win on read.
    pub(crate) queued: Vec<(MutationId, RecordMap)>,
    pub(crate) root_calls: RootCallMap,
    pub(crate) cached_root_calls: RootCallMap,
    /// node id -> connections with an edge to it
    pub(crate) node_connections: HashMap<DataId, BTreeSet<DataId>>,
    pub(crate) cache_manager: Option<Arc<dyn CacheManager>>,
    pub(crate) client_ids: ClientIdGenerator,
}

impl StoreLayers {
    pub fn new(client_ids: ClientIdGenerator) -> Self {
        Self { client_ids, ..Self::default() }
    }

    pub fn base(&self) -> &RecordMap {
        &self.base
    }

    pub fn cached(&self) -> &RecordMap {
        &self.cached
    }

    pub fn queued(&self, mutation_id: &MutationId) -> Option<&RecordMap> {
        self.queued.iter().find(|(id, _)| id == mutation_id).map(|(_, records)| records)
    }

    pub fn has_queued(&self) -> bool {
        !self.queued.is_empty()
    }

    pub(crate) fn queued_mut(&mut self, mutation_id: &MutationId) -> &mut RecordMap {
        let index = match self.queued.iter().position(|(id, _)| id == mutation_id) {
            Some(index) => index,
            None => {
                self.queued.push((mutation_id.clone(), RecordMap::new()));
                self.queued.len() - 1
            }
        };
        &mut self.queued[index].1
    }

    pub(crate) fn remove_queued(&mut self, mutation_id: &MutationId) -> Option<RecordMap> {
        let index = self.queued.iter().position(|(id, _)| id == mutation_id)?;
        Some(self.queued.remove(index).1)
    }

    pub(crate) fn link_node(&mut self, node_id: &DataId, connection_id: &DataId) {
        self.node_connections.entry(node_id.clone()).or_default().insert(connection_id.clone());
    }

    pub(crate) fn unlink_node(&mut self, node_id: &DataId, connection_id: &DataId) {
        if let Some(connections) = self.node_connections.get_mut(node_id) {
            connections.remove(connection_id);
            if connections.is_empty() {
                self.node_connections.remove(node_id);
            }
        }
    }

    /// Drop every reverse-index entry mentioning `id`, as node or connection.
    pub(crate) fn forget_connections(&mut self, id: &DataId) {
        self.node_connections.remove(id);
        self.node_connections.retain(|_, connections| {
            connections.remove(id);
            !connections.is_empty()
        });
    }
}
