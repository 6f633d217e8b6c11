//! Root call resolution.

use graphcache_core::Error;
use graphcache_core::record::{DataId, RootCallKey};

use super::RecordStore;

/// Root call whose argument is the record id.
pub const NODE_CALL: &str = "node";
/// Plural form of [`NODE_CALL`].
pub const NODES_CALL: &str = "nodes";

fn is_node_call(name: &str) -> bool {
    name == NODE_CALL || name == NODES_CALL
}

fn node_argument(name: &str, arg: Option<&str>) -> Result<DataId, Error> {
    arg.map(DataId::from).ok_or_else(|| Error::MissingNodeArgument(name.to_string()))
}

impl RecordStore<'_> {
    /// The id a root call resolved to, if known.
    ///
    /// `node`/`nodes` calls resolve to their argument without a lookup.
    pub fn get_root_call_id(&self, name: &str, arg: Option<&str>) -> Result<Option<DataId>, Error> {
        if is_node_call(name) {
            return node_argument(name, arg).map(Some);
        }
        let key = RootCallKey::new(name, arg);
        let id = self.layers.root_calls.get(&key).or_else(|| {
            if self.view == super::StoreView::Base { None } else { self.layers.cached_root_calls.get(&key) }
        });
        Ok(id.cloned())
    }

    pub fn put_root_call_id(&mut self, name: &str, arg: Option<&str>, id: &DataId) -> Result<(), Error> {
        if is_node_call(name) {
            node_argument(name, arg)?;
            tracing::debug!(root_call = name, "node calls are never stored");
            return Ok(());
        }
        let key = RootCallKey::new(name, arg);
        if let Some(cache) = self.cache_manager() {
            cache.cache_root_call(&key, id);
        }
        self.layers.root_calls.insert(key, id.clone());
        Ok(())
    }
}
