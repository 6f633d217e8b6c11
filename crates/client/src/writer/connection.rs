//! Connection fields: the connection record, its range and its edges.

use graphcache_core::Error;
use graphcache_core::range::PageInfo;
use graphcache_core::record::{DataId, RANGE_KEY, RecordStatus};
use serde_json::{Map, Value};

use super::{QueryWriter, Scope, expect_object, payload_id};
use crate::query::{EDGES, Field, HAS_NEXT_PAGE, HAS_PREVIOUS_PAGE, NODE, PAGE_INFO, Selection};

fn page_info(connection_id: &DataId, payload: &Map<String, Value>) -> Result<PageInfo, Error> {
    let Some(Value::Object(info)) = payload.get(PAGE_INFO) else {
        return Err(Error::InvalidPayload(format!(
            "cannot write edges for connection `{connection_id}` without `{PAGE_INFO}`"
        )));
    };
    let flag = |key: &str| info.get(key).and_then(Value::as_bool).unwrap_or(false);
    Ok(PageInfo { has_next_page: flag(HAS_NEXT_PAGE), has_previous_page: flag(HAS_PREVIOUS_PAGE) })
}

impl QueryWriter<'_> {
    pub(super) fn write_connection(
        &mut self,
        field: &Field,
        id: &DataId,
        key: &str,
        value: &Value,
        scope: Scope<'_>,
    ) -> Result<(), Error> {
        let payload = expect_object(value, || format!("connection `{id}.{key}`"))?;
        let prev = self.store.get_linked_record_id(id, key)?.cloned();
        let connection_id = match &prev {
            Some(connection_id) => connection_id.clone(),
            None => self.store.generate_client_id(),
        };

        self.ensure_record(&connection_id);
        if prev.as_ref() != Some(&connection_id) {
            self.store.put_linked_record_id(id, key, &connection_id)?;
            self.changes.update_id(id);
        }

        let has_edges = field.child_field(EDGES).is_some();
        let stale = !self.store.has_range(&connection_id)
            || self.options.force_index > self.store.get_range_force_index(&connection_id);
        if !self.options.optimistic && has_edges && stale {
            self.store.put_range(&connection_id, &field.calls, self.options.force_index)?;
            self.changes.update_id(&connection_id);
        }

        self.traverse_connection(field, &field.children, &connection_id, payload, scope.nested())
    }

    fn traverse_connection(
        &mut self,
        connection: &Field,
        selections: &[Selection],
        connection_id: &DataId,
        payload: &Map<String, Value>,
        scope: Scope<'_>,
    ) -> Result<(), Error> {
        for selection in selections {
            match selection {
                Selection::Field(child) if child.name == EDGES => {
                    self.write_edges(connection, child, connection_id, payload, scope)?;
                }
                // page info lives on the range
                Selection::Field(child) if child.name == PAGE_INFO => {}
                Selection::Field(child) => self.write_field(child, connection_id, payload, scope)?,
                Selection::Fragment(fragment) => {
                    self.traverse_connection(
                        connection,
                        &fragment.children,
                        connection_id,
                        payload,
                        scope.within(fragment),
                    )?;
                }
            }
        }
        Ok(())
    }

    fn write_edges(
        &mut self,
        connection: &Field,
        edges_field: &Field,
        connection_id: &DataId,
        payload: &Map<String, Value>,
        scope: Scope<'_>,
    ) -> Result<(), Error> {
        let edges = match payload.get(edges_field.payload_key()) {
            Some(Value::Array(edges)) => edges,
            Some(_) => {
                return Err(Error::InvalidPayload(format!("`{EDGES}` of connection `{connection_id}` must be a list")));
            }
            None if scope.deferred => return Ok(()),
            None => return Err(Error::UndefinedValue(format!("{connection_id}.{EDGES}"))),
        };
        let page_info = page_info(connection_id, payload)?;
        if self.options.optimistic {
            return Ok(());
        }

        let prev_edges = self
            .store
            .get_range_metadata(connection_id, &connection.calls)?
            .map(|metadata| metadata.requested_edges)
            .unwrap_or_default();

        let prev_range = self.store.get_field(connection_id, RANGE_KEY)?.cloned();
        let mut next_edges: Vec<DataId> = Vec::with_capacity(edges.len());
        for edge in edges {
            if edge.is_null() {
                continue;
            }
            let edge_payload = expect_object(edge, || format!("edges of `{connection_id}`"))?;
            let node_payload = match edge_payload.get(NODE) {
                None | Some(Value::Null) => continue,
                Some(node) => expect_object(node, || format!("an edge node of `{connection_id}`"))?,
            };

            // edge ids derive from the node, so an id-less node reuses the
            // node of the edge previously at this position
            let prev_edge = prev_edges.get(next_edges.len());
            let node_id = match payload_id(node_payload) {
                Some(node_id) => node_id,
                None => match prev_edge
                    .filter(|prev| self.store.get_record_status(&prev.edge_id) == RecordStatus::Existent)
                {
                    Some(prev) => prev.node_id.clone(),
                    None => self.store.generate_client_id(),
                },
            };
            let edge_id = self.store.edge_id(connection_id, &node_id);

            self.ensure_record(&edge_id);
            self.ensure_record(&node_id);
            if self.store.get_linked_record_id(&edge_id, NODE)? != Some(&node_id) {
                self.store.put_linked_record_id(&edge_id, NODE, &node_id)?;
                self.changes.update_id(&edge_id);
            }
            let edge_scope = Scope { deferred: scope.deferred, node_id: Some(&node_id) };
            self.traverse(&edges_field.children, &edge_id, edge_payload, edge_scope)?;
            next_edges.push(edge_id);
        }

        // any difference in edges, cursors, completeness or page info
        self.store.put_range_edges(connection_id, &connection.calls, page_info, &next_edges)?;
        if self.store.get_field(connection_id, RANGE_KEY)? != prev_range.as_ref() {
            self.changes.update_id(connection_id);
        }
        Ok(())
    }
}
