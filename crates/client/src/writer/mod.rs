//! Normalizes response payloads into a [`RecordStore`].
//!
//! The writer walks a [`RootQuery`] and its payload in lock-step. Every record
//! that did not exist before the walk is reported as created; every record
//! with at least one changed field or link is reported as updated. Writing
//! the same payload twice yields an empty change set the second time.

use graphcache_core::Error;
use graphcache_core::record::{DataId, FieldValue, RecordStatus};
use serde_json::{Map, Value};

use crate::change::{ChangeSet, ChangeTracker};
use crate::query::{Field, FieldKind, Fragment, ID, NODE, RootArg, RootQuery, Selection};
use crate::store::RecordStore;

mod connection;

/// How a payload is written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterOptions {
    /// Replace existing ranges whose force index is lower than this.
    pub force_index: u64,
    /// The payload is an optimistic guess; ranges are left untouched.
    pub optimistic: bool,
}

/// Position of the walk inside the query.
#[derive(Debug, Clone, Copy, Default)]
struct Scope<'n> {
    /// Inside a deferred fragment, where fields may be absent.
    deferred: bool,
    /// Node id already chosen for the `node` field of the current edge.
    node_id: Option<&'n DataId>,
}

impl Scope<'_> {
    fn nested(self) -> Scope<'static> {
        Scope { deferred: self.deferred, node_id: None }
    }

    fn within(self, fragment: &Fragment) -> Self {
        Scope { deferred: self.deferred || fragment.deferred, ..self }
    }
}

fn payload_id(payload: &Map<String, Value>) -> Option<DataId> {
    match payload.get(ID)? {
        Value::String(id) => Some(DataId::new(id.as_str())),
        Value::Number(id) => Some(DataId::new(id.to_string())),
        _ => None,
    }
}

fn expect_object<'v>(value: &'v Value, what: impl FnOnce() -> String) -> Result<&'v Map<String, Value>, Error> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(Error::InvalidPayload(format!("expected an object for {}", what()))),
    }
}

pub struct QueryWriter<'a> {
    store: RecordStore<'a>,
    changes: ChangeTracker,
    options: WriterOptions,
}

impl<'a> QueryWriter<'a> {
    pub fn new(store: RecordStore<'a>, options: WriterOptions) -> Self {
        Self { store, changes: ChangeTracker::new(), options }
    }

    pub fn store(&self) -> &RecordStore<'a> {
        &self.store
    }

    pub fn changes(&self) -> &ChangeTracker {
        &self.changes
    }

    pub fn into_change_set(self) -> ChangeSet {
        self.changes.into_change_set()
    }

    /// Write the response to `query`.
    ///
    /// Single-valued root calls must receive exactly one payload entry.
    pub fn write_payload(&mut self, query: &RootQuery, payload: &Value) -> Result<(), Error> {
        let root = &query.root_call;
        let entries = expect_object(payload, || format!("the payload of `{root}`"))?;

        match &root.arg {
            RootArg::None | RootArg::Value(_) => {
                let arg = match &root.arg {
                    RootArg::Value(value) => Some(value.as_str()),
                    _ => None,
                };
                let mut values = entries.values();
                match (values.next(), entries.len()) {
                    (Some(value), 1) => self.write_root(query, arg, value),
                    (None, _) => Err(Error::UndefinedValue(root.to_string())),
                    (_, count) => Err(Error::AmbiguousPayload { root_call: root.to_string(), count }),
                }
            }
            RootArg::Values(args) => {
                if let Some(unexpected) = entries.keys().find(|key| !args.contains(key)) {
                    return Err(Error::InvalidPayload(format!(
                        "unexpected entry `{unexpected}` in the payload of `{root}`"
                    )));
                }
                for arg in args {
                    let value = entries
                        .get(arg)
                        .ok_or_else(|| Error::UndefinedValue(format!("{}({arg})", root.name)))?;
                    self.write_root(query, Some(arg), value)?;
                }
                Ok(())
            }
            RootArg::Ref(_) => {
                for (arg, value) in entries {
                    self.write_root(query, Some(arg), value)?;
                }
                Ok(())
            }
        }
    }

    fn root_id(&mut self, query: &RootQuery, arg: Option<&str>, value: &Value) -> Result<DataId, Error> {
        let root = &query.root_call;
        if root.is_node_call() {
            return self
                .store
                .get_root_call_id(&root.name, arg)?
                .ok_or_else(|| Error::MissingNodeArgument(root.name.clone()));
        }
        if let Some(id) = value.as_object().and_then(payload_id) {
            return Ok(id);
        }
        match self.store.get_root_call_id(&root.name, arg)? {
            Some(id) => Ok(id),
            None => Ok(self.store.generate_client_id()),
        }
    }

    fn write_root(&mut self, query: &RootQuery, arg: Option<&str>, value: &Value) -> Result<(), Error> {
        let id = self.root_id(query, arg, value)?;
        self.store.put_root_call_id(&query.root_call.name, arg, &id)?;
        let status = self.store.get_record_status(&id);

        if value.is_null() {
            self.store.delete_record(&id);
            if status == RecordStatus::Existent {
                self.changes.update_id(&id);
            }
            return Ok(());
        }

        let payload = expect_object(value, || format!("root record `{id}`"))?;
        if status != RecordStatus::Existent {
            self.changes.create_id(&id);
        }
        self.store.put_record(&id);
        self.traverse(&query.children, &id, payload, Scope::default())
    }

    fn traverse(
        &mut self,
        selections: &[Selection],
        id: &DataId,
        payload: &Map<String, Value>,
        scope: Scope<'_>,
    ) -> Result<(), Error> {
        for selection in selections {
            match selection {
                Selection::Field(field) => self.write_field(field, id, payload, scope)?,
                Selection::Fragment(fragment) => self.traverse(&fragment.children, id, payload, scope.within(fragment))?,
            }
        }
        Ok(())
    }

    fn write_field(
        &mut self,
        field: &Field,
        id: &DataId,
        payload: &Map<String, Value>,
        scope: Scope<'_>,
    ) -> Result<(), Error> {
        let Some(value) = payload.get(field.payload_key()) else {
            if scope.deferred {
                return Ok(());
            }
            return Err(Error::UndefinedValue(format!("{id}.{}", field.payload_key())));
        };
        let key = field.storage_key();
        if value.is_null() {
            return self.write_null(id, &key);
        }
        match field.kind {
            FieldKind::Scalar => self.write_scalar(id, &key, value),
            FieldKind::Linked => self.write_link(field, id, &key, value, scope),
            FieldKind::Plural => self.write_plural(field, id, &key, value, scope),
            FieldKind::Connection => self.write_connection(field, id, &key, value, scope),
        }
    }

    /// Mark `id` created if needed and make sure it exists.
    fn ensure_record(&mut self, id: &DataId) {
        if self.store.get_record_status(id) != RecordStatus::Existent {
            self.changes.create_id(id);
        }
        self.store.put_record(id);
    }

    fn resolve_id(&mut self, payload: &Map<String, Value>, prev: Option<&DataId>) -> DataId {
        payload_id(payload)
            .or_else(|| prev.cloned())
            .unwrap_or_else(|| self.store.generate_client_id())
    }

    fn write_null(&mut self, id: &DataId, key: &str) -> Result<(), Error> {
        let prev = self.store.get_field(id, key)?.cloned();
        if prev.as_ref().is_some_and(FieldValue::is_null) {
            return Ok(());
        }
        if let Some(FieldValue::Link(target)) = &prev
            && self.store.is_client_id(target)
            && self.store.get_record_status(target) == RecordStatus::Existent
        {
            self.store.delete_record(target);
            self.changes.update_id(target);
        }
        self.store.delete_field(id, key)?;
        self.changes.update_id(id);
        Ok(())
    }

    fn write_scalar(&mut self, id: &DataId, key: &str, value: &Value) -> Result<(), Error> {
        let next = FieldValue::Scalar(value.clone());
        if self.store.get_field(id, key)? == Some(&next) {
            return Ok(());
        }
        self.store.put_field(id, key, next)?;
        self.changes.update_id(id);
        Ok(())
    }

    fn write_link(
        &mut self,
        field: &Field,
        id: &DataId,
        key: &str,
        value: &Value,
        scope: Scope<'_>,
    ) -> Result<(), Error> {
        let payload = expect_object(value, || format!("`{id}.{key}`"))?;
        let prev = self.store.get_linked_record_id(id, key)?.cloned();
        let next = match scope.node_id.filter(|_| field.name == NODE) {
            Some(node_id) => node_id.clone(),
            None => self.resolve_id(payload, prev.as_ref()),
        };

        self.ensure_record(&next);
        if prev.as_ref() != Some(&next) {
            self.store.put_linked_record_id(id, key, &next)?;
            self.changes.update_id(id);
        }
        self.traverse(&field.children, &next, payload, scope.nested())
    }

    fn write_plural(
        &mut self,
        field: &Field,
        id: &DataId,
        key: &str,
        value: &Value,
        scope: Scope<'_>,
    ) -> Result<(), Error> {
        let Value::Array(items) = value else {
            return Err(Error::InvalidPayload(format!("expected a list for `{id}.{key}`")));
        };
        let prev: Option<Vec<DataId>> = self.store.get_linked_record_ids(id, key)?.map(<[DataId]>::to_vec);

        let mut next = Vec::with_capacity(items.len());
        for item in items {
            let payload = expect_object(item, || format!("items of `{id}.{key}`"))?;
            let child = self.resolve_id(payload, prev.as_ref().and_then(|prev| prev.get(next.len())));
            self.ensure_record(&child);
            self.traverse(&field.children, &child, payload, scope.nested())?;
            next.push(child);
        }

        if prev.as_deref() != Some(next.as_slice()) {
            self.store.put_linked_record_ids(id, key, next)?;
            self.changes.update_id(id);
        }
        Ok(())
    }
}
