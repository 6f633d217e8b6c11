//! Normalized record model.
//!
//! Every entity in a response is flattened into a [`Record`] addressed by a
//! [`DataId`]. Records never own each other: links between records are plain
//! ids, so the whole graph is reachable only through a [`RecordMap`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::range::{Range, RangeOperation};

mod client_id;

pub use client_id::{CLIENT_ID_PREFIX, ClientIdGenerator};

/// Field key under which a connection record keeps its [`Range`].
pub const RANGE_KEY: &str = "__range__";

/// Opaque identifier of one normalized entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataId(String);

impl DataId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for DataId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DataId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for DataId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Existence of a record as seen through a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    /// At least one write happened and no delete followed it.
    Existent,
    /// Deleted explicitly, or the server returned null for it.
    Nonexistent,
    /// Never observed.
    Unknown,
}

/// A single field value.
///
/// A key that is absent from [`Record::fields`] is *undefined*; an explicit
/// `Scalar(Value::Null)` is *null*. The two are kept apart because undefined
/// lets reads fall through to lower layers while null overrides them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Scalar(Value),
    Link(DataId),
    Links(Vec<DataId>),
    Range(Range),
}

impl FieldValue {
    pub fn null() -> Self {
        FieldValue::Scalar(Value::Null)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Scalar(Value::Null))
    }

    pub fn as_link(&self) -> Option<&DataId> {
        match self {
            FieldValue::Link(id) => Some(id),
            _ => None,
        }
    }

    pub fn as_links(&self) -> Option<&[DataId]> {
        match self {
            FieldValue::Links(ids) => Some(ids),
            _ => None,
        }
    }

    pub fn as_range(&self) -> Option<&Range> {
        match self {
            FieldValue::Range(range) => Some(range),
            _ => None,
        }
    }

    /// Ids this value references, in order.
    pub fn linked_ids(&self) -> Vec<&DataId> {
        match self {
            FieldValue::Scalar(_) => Vec::new(),
            FieldValue::Link(id) => vec![id],
            FieldValue::Links(ids) => ids.iter().collect(),
            FieldValue::Range(range) => range.edge_ids(),
        }
    }
}

/// Range edits queued by an optimistic mutation against a connection.
///
/// Only ever populated on records in a queued overlay; the confirmed range
/// is left untouched until the server responds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeOps {
    pub append: Vec<DataId>,
    pub prepend: Vec<DataId>,
    pub remove: Vec<DataId>,
}

impl RangeOps {
    pub fn is_empty(&self) -> bool {
        self.append.is_empty() && self.prepend.is_empty() && self.remove.is_empty()
    }

    pub fn push(&mut self, operation: RangeOperation, edge_id: DataId) {
        match operation {
            RangeOperation::Append => self.append.push(edge_id),
            RangeOperation::Prepend => self.prepend.insert(0, edge_id),
            RangeOperation::Remove => self.remove.push(edge_id),
        }
    }

    /// Folds a later overlay's edits on top of these.
    pub fn merge(&mut self, later: &RangeOps) {
        self.append.extend(later.append.iter().cloned());
        let mut prepend = later.prepend.clone();
        prepend.append(&mut self.prepend);
        self.prepend = prepend;
        self.remove.extend(later.remove.iter().cloned());
    }
}

/// One normalized entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: DataId,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
    #[serde(default, skip_serializing_if = "RangeOps::is_empty")]
    pub range_ops: RangeOps,
}

impl Record {
    pub fn new(id: DataId) -> Self {
        Self { id, fields: BTreeMap::new(), range_ops: RangeOps::default() }
    }

    pub fn range(&self) -> Option<&Range> {
        self.fields.get(RANGE_KEY).and_then(FieldValue::as_range)
    }

    pub fn range_mut(&mut self) -> Option<&mut Range> {
        match self.fields.get_mut(RANGE_KEY) {
            Some(FieldValue::Range(range)) => Some(range),
            _ => None,
        }
    }
}

/// One storage layer. `None` marks a deleted record; a missing key means the
/// layer has never seen the id.
pub type RecordMap = HashMap<DataId, Option<Record>>;

/// Identity of a root call: its name plus the identifying argument, if any.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RootCallKey {
    pub name: String,
    pub arg: Option<String>,
}

impl RootCallKey {
    pub fn new(name: impl Into<String>, arg: Option<&str>) -> Self {
        Self { name: name.into(), arg: arg.map(str::to_string) }
    }
}

impl fmt::Display for RootCallKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.arg {
            Some(arg) => write!(f, "{}({})", self.name, arg),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Resolved root calls.
pub type RootCallMap = HashMap<RootCallKey, DataId>;
