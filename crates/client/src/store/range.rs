//! Range operations on connection records.

use graphcache_core::Error;
use graphcache_core::range::{Call, PageInfo, Range, RangeEdge, RangeOperation, filter_calls};
use graphcache_core::record::{DataId, FieldValue, RANGE_KEY, RangeOps, Record, RecordStatus};

use super::RecordStore;
use crate::query::{CURSOR, NODE};

/// An edge and the node it points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeRef {
    pub edge_id: DataId,
    pub node_id: DataId,
}

/// What a connection can serve for one set of calls.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeMetadata {
    pub requested_edges: Vec<EdgeRef>,
    /// Filter calls followed by the pagination calls still to fetch; empty when satisfied.
    pub diff_calls: Vec<Call>,
    pub filter_calls: Vec<Call>,
    pub page_info: PageInfo,
}

impl RecordStore<'_> {
    fn lookup_range(&self, id: &DataId) -> Option<&Range> {
        self.lookup_field(id, RANGE_KEY).and_then(FieldValue::as_range)
    }

    /// The base copy of a range, copied up from lower layers on first write.
    fn base_range_mut(&mut self, id: &DataId) -> Result<&mut Range, Error> {
        let in_base = self.layers.base.get(id).and_then(Option::as_ref).and_then(Record::range).is_some();
        if !in_base {
            let range = self.lookup_range(id).cloned().ok_or_else(|| Error::RangeMissing(id.clone()))?;
            self.layers
                .base
                .entry(id.clone())
                .or_insert(None)
                .get_or_insert_with(|| Record::new(id.clone()))
                .fields
                .insert(RANGE_KEY.to_string(), FieldValue::Range(range));
        }
        self.layers
            .base
            .get_mut(id)
            .and_then(Option::as_mut)
            .and_then(Record::range_mut)
            .ok_or_else(|| Error::RangeMissing(id.clone()))
    }

    fn cache_range(&self, id: &DataId) {
        let Some(cache) = self.cache_manager() else {
            return;
        };
        if let Some(value) = self.layers.base.get(id).and_then(Option::as_ref).and_then(|r| r.fields.get(RANGE_KEY)) {
            cache.cache_field(id, RANGE_KEY, Some(value));
        }
    }

    fn read_edge(&self, edge_id: &DataId) -> Result<RangeEdge, Error> {
        let node_id = self
            .get_linked_record_id(edge_id, NODE)?
            .cloned()
            .ok_or_else(|| Error::UndefinedValue(format!("{edge_id}.{NODE}")))?;
        let cursor = match self.get_field(edge_id, CURSOR)? {
            Some(FieldValue::Scalar(serde_json::Value::String(cursor))) => Some(cursor.clone()),
            Some(FieldValue::Scalar(value)) if !value.is_null() => Some(value.to_string()),
            _ => None,
        };
        Ok(RangeEdge { edge_id: edge_id.clone(), node_id, cursor })
    }

    fn queued_range_ops(&self, id: &DataId) -> Option<RangeOps> {
        if !self.is_optimistic() {
            return None;
        }
        let mut ops = RangeOps::default();
        for (_, records) in &self.layers.queued {
            if let Some(Some(record)) = records.get(id) {
                ops.merge(&record.range_ops);
            }
        }
        Some(ops)
    }

    pub fn has_range(&self, id: &DataId) -> bool {
        self.lookup_range(id).is_some()
    }

    pub fn get_range_force_index(&self, id: &DataId) -> u64 {
        self.lookup_range(id).map_or(0, Range::force_index)
    }

    /// Create or replace the range on `id`, discarding every filtered view.
    pub fn put_range(&mut self, id: &DataId, calls: &[Call], force_index: u64) -> Result<(), Error> {
        if self.is_optimistic() {
            return Err(Error::QueuedRangeWrite(id.clone()));
        }
        self.ensure_exists(id)?;

        let stale_nodes: Vec<DataId> = self
            .lookup_range(id)
            .map(|range| range.views().flat_map(|view| view.edges()).map(|edge| edge.node_id.clone()).collect())
            .unwrap_or_default();
        for node_id in &stale_nodes {
            self.layers.unlink_node(node_id, id);
        }

        self.put_field(id, RANGE_KEY, FieldValue::Range(Range::new(filter_calls(calls), force_index)))
    }

    /// Install the result of one fetch into the view implied by `calls`.
    pub fn put_range_edges(
        &mut self,
        id: &DataId,
        calls: &[Call],
        page_info: PageInfo,
        edge_ids: &[DataId],
    ) -> Result<(), Error> {
        if self.is_optimistic() {
            return Err(Error::QueuedRangeWrite(id.clone()));
        }
        if !self.has_range(id) {
            return Err(Error::RangeMissing(id.clone()));
        }
        let edges = edge_ids.iter().map(|edge_id| self.read_edge(edge_id)).collect::<Result<Vec<_>, _>>()?;
        let nodes: Vec<DataId> = edges.iter().map(|edge| edge.node_id.clone()).collect();

        let added = self.base_range_mut(id)?.add_items(calls, edges, page_info)?;
        if added {
            for node_id in &nodes {
                self.layers.link_node(node_id, id);
            }
        }
        self.cache_range(id);
        Ok(())
    }

    /// Append, prepend or remove one edge across every view of the range.
    ///
    /// Queued views only record the edit on their overlay.
    pub fn apply_range_update(&mut self, id: &DataId, edge_id: &DataId, operation: RangeOperation) -> Result<(), Error> {
        if !self.has_range(id) {
            return Err(Error::RangeMissing(id.clone()));
        }
        if self.is_optimistic() {
            self.target_record_mut(id).range_ops.push(operation, edge_id.clone());
            return Ok(());
        }

        match operation {
            RangeOperation::Remove => {
                let range = self.base_range_mut(id)?;
                let node_id = range
                    .views()
                    .flat_map(|view| view.edges())
                    .find(|edge| &edge.edge_id == edge_id)
                    .map(|edge| edge.node_id.clone());
                range.remove_edge(edge_id);
                if let Some(node_id) = node_id
                    && !range.contains_node(&node_id)
                {
                    self.layers.unlink_node(&node_id, id);
                }
            }
            RangeOperation::Append | RangeOperation::Prepend => {
                let edge = self.read_edge(edge_id)?;
                let range = self.base_range_mut(id)?;
                range.apply(operation, &edge);
                if range.contains_node(&edge.node_id) {
                    self.layers.link_node(&edge.node_id, id);
                }
            }
        }
        self.cache_range(id);
        Ok(())
    }

    /// Edges currently satisfying `calls` and the calls needed to fetch the rest.
    ///
    /// `None` when `id` has no range.
    pub fn get_range_metadata(&self, id: &DataId, calls: &[Call]) -> Result<Option<RangeMetadata>, Error> {
        let Some(range) = self.lookup_range(id) else {
            return Ok(None);
        };
        let ops = self.queued_range_ops(id);
        let info = range.retrieve(calls, ops.as_ref())?;
        let filters = filter_calls(calls);

        let requested_edges = info
            .edge_ids
            .into_iter()
            .filter(|edge_id| self.get_record_status(edge_id) == RecordStatus::Existent)
            .filter_map(|edge_id| {
                let node_id = self.lookup_field(&edge_id, NODE).and_then(FieldValue::as_link)?.clone();
                Some(EdgeRef { edge_id, node_id })
            })
            .collect();

        let diff_calls = if info.diff_calls.is_empty() {
            Vec::new()
        } else {
            filters.iter().cloned().chain(info.diff_calls).collect()
        };

        Ok(Some(RangeMetadata { requested_edges, diff_calls, filter_calls: filters, page_info: info.page_info }))
    }

    /// Connections that currently hold an edge to `node_id`.
    pub fn get_connection_ids_for_record(&self, node_id: &DataId) -> Option<Vec<DataId>> {
        self.layers
            .node_connections
            .get(node_id)
            .filter(|connections| !connections.is_empty())
            .map(|connections| connections.iter().cloned().collect())
    }
}
