//! Query trees consumed by the writer and the deferred tracker.
//!
//! Parsing and compiling a query language is left to callers; this module
//! only models the shape the cache needs: a root call, nested fields with
//! their calls, and fragments that may be deferred.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use graphcache_core::range::{Call, calls_key, filter_calls};
use graphcache_core::record::RootCallKey;

use crate::store::{NODE_CALL, NODES_CALL};

mod path;

pub use path::RefParam;

pub const ID: &str = "id";
pub const EDGES: &str = "edges";
pub const NODE: &str = "node";
pub const CURSOR: &str = "cursor";
pub const PAGE_INFO: &str = "pageInfo";
pub const HAS_NEXT_PAGE: &str = "hasNextPage";
pub const HAS_PREVIOUS_PAGE: &str = "hasPreviousPage";

static NEXT_QUERY_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a [`RootQuery`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryId(u64);

impl QueryId {
    pub fn next() -> Self {
        Self(NEXT_QUERY_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q{}", self.0)
    }
}

pub type FragmentId = String;

/// Argument of a root call.
#[derive(Debug, Clone, PartialEq)]
pub enum RootArg {
    None,
    Value(String),
    /// Batched call over several literal ids.
    Values(Vec<String>),
    /// Ids taken from another query's response.
    Ref(RefParam),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RootCall {
    pub name: String,
    pub arg: RootArg,
}

impl RootCall {
    pub fn new(name: impl Into<String>, arg: RootArg) -> Self {
        Self { name: name.into(), arg }
    }

    pub fn is_node_call(&self) -> bool {
        self.name == NODE_CALL || self.name == NODES_CALL
    }

    /// Root call keys known before any response; empty for ref arguments.
    pub fn keys(&self) -> Vec<RootCallKey> {
        match &self.arg {
            RootArg::None => vec![RootCallKey::new(&self.name, None)],
            RootArg::Value(value) => vec![RootCallKey::new(&self.name, Some(value.as_str()))],
            RootArg::Values(values) => values.iter().map(|value| RootCallKey::new(&self.name, Some(value.as_str()))).collect(),
            RootArg::Ref(_) => Vec::new(),
        }
    }
}

impl fmt::Display for RootCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.arg {
            RootArg::None => write!(f, "{}", self.name),
            RootArg::Value(value) => write!(f, "{}({value})", self.name),
            RootArg::Values(values) => write!(f, "{}({})", self.name, values.join(",")),
            RootArg::Ref(param) => write!(f, "{}(<ref {}>)", self.name, param.query),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Scalar,
    /// Single linked record.
    Linked,
    /// Ordered list of linked records.
    Plural,
    /// Paginated connection with `edges` and `pageInfo`.
    Connection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub alias: Option<String>,
    pub calls: Vec<Call>,
    pub kind: FieldKind,
    pub children: Vec<Selection>,
}

impl Field {
    fn with_kind(name: impl Into<String>, kind: FieldKind, children: Vec<Selection>) -> Self {
        Self { name: name.into(), alias: None, calls: Vec::new(), kind, children }
    }

    pub fn scalar(name: impl Into<String>) -> Self {
        Self::with_kind(name, FieldKind::Scalar, Vec::new())
    }

    pub fn linked(name: impl Into<String>, children: Vec<Selection>) -> Self {
        Self::with_kind(name, FieldKind::Linked, children)
    }

    pub fn plural(name: impl Into<String>, children: Vec<Selection>) -> Self {
        Self::with_kind(name, FieldKind::Plural, children)
    }

    pub fn connection(name: impl Into<String>, calls: Vec<Call>, children: Vec<Selection>) -> Self {
        Self { calls, ..Self::with_kind(name, FieldKind::Connection, children) }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn calls(mut self, calls: Vec<Call>) -> Self {
        self.calls = calls;
        self
    }

    /// Key of this field in a response payload.
    pub fn payload_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Key of this field in a record. Connections drop their pagination calls
    /// so every page lands on the same connection record.
    pub fn storage_key(&self) -> String {
        let calls = match self.kind {
            FieldKind::Connection => filter_calls(&self.calls),
            _ => self.calls.clone(),
        };
        if calls.is_empty() { self.name.clone() } else { format!("{}.{}", self.name, calls_key(&calls)) }
    }

    pub fn child_field(&self, name: &str) -> Option<&Field> {
        find_field(&self.children, name)
    }
}

fn find_field<'a>(selections: &'a [Selection], name: &str) -> Option<&'a Field> {
    selections.iter().find_map(|selection| match selection {
        Selection::Field(field) if field.name == name => Some(field),
        Selection::Field(_) => None,
        Selection::Fragment(fragment) => find_field(&fragment.children, name),
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub id: FragmentId,
    pub deferred: bool,
    pub children: Vec<Selection>,
}

impl Fragment {
    pub fn new(id: impl Into<FragmentId>, children: Vec<Selection>) -> Self {
        Self { id: id.into(), deferred: false, children }
    }

    pub fn deferred(id: impl Into<FragmentId>, children: Vec<Selection>) -> Self {
        Self { deferred: true, ..Self::new(id, children) }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Field(Field),
    Fragment(Fragment),
}

impl From<Field> for Selection {
    fn from(field: Field) -> Self {
        Selection::Field(field)
    }
}

impl From<Fragment> for Selection {
    fn from(fragment: Fragment) -> Self {
        Selection::Fragment(fragment)
    }
}

/// A top-level query: one root call and its selections.
#[derive(Debug, Clone, PartialEq)]
pub struct RootQuery {
    pub id: QueryId,
    pub root_call: RootCall,
    pub children: Vec<Selection>,
    /// Split off from a parent query and fetched on its own.
    pub deferred: bool,
}

impl RootQuery {
    pub fn new(root_call: RootCall, children: Vec<Selection>) -> Self {
        Self { id: QueryId::next(), root_call, children, deferred: false }
    }

    pub fn into_deferred(mut self) -> Self {
        self.deferred = true;
        self
    }

    /// The query whose response supplies this query's root ids.
    pub fn parent_id(&self) -> Option<QueryId> {
        match &self.root_call.arg {
            RootArg::Ref(param) => Some(param.query),
            _ => None,
        }
    }

    /// Ids of every deferred fragment in the tree, in document order.
    pub fn deferred_fragment_ids(&self) -> Vec<FragmentId> {
        let mut ids = Vec::new();
        collect_deferred(&self.children, &mut ids);
        ids
    }
}

fn collect_deferred(selections: &[Selection], ids: &mut Vec<FragmentId>) {
    for selection in selections {
        let children = match selection {
            Selection::Field(field) => &field.children,
            Selection::Fragment(fragment) => {
                if fragment.deferred && !ids.contains(&fragment.id) {
                    ids.push(fragment.id.clone());
                }
                &fragment.children
            }
        };
        collect_deferred(children, ids);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_storage_key_drops_pagination() {
        let field = Field::connection(
            "friends",
            vec![Call::new("orderby", "TOP_STORIES"), Call::first(10), Call::after("c1")],
            Vec::new(),
        );
        assert_eq!(field.storage_key(), "friends.orderby(TOP_STORIES)");

        let plain = Field::scalar("profilePicture").calls(vec![Call::new("size", 32)]);
        assert_eq!(plain.storage_key(), "profilePicture.size(32)");
        assert_eq!(Field::scalar("name").storage_key(), "name");
    }

    #[test]
    fn test_payload_key_prefers_alias() {
        let field = Field::scalar("name").alias("displayName");
        assert_eq!(field.payload_key(), "displayName");
        assert_eq!(field.storage_key(), "name");
    }

    #[test]
    fn test_deferred_fragment_ids() {
        let query = RootQuery::new(
            RootCall::new("viewer", RootArg::None),
            vec![
                Fragment::deferred("F1", vec![Field::scalar("name").into()]).into(),
                Field::linked("actor", vec![Fragment::deferred("F2", Vec::new()).into()]).into(),
                Fragment::new("F3", Vec::new()).into(),
            ],
        );
        assert_eq!(query.deferred_fragment_ids(), vec!["F1".to_string(), "F2".to_string()]);
    }

    #[test]
    fn test_root_call_keys() {
        let call = RootCall::new("nodes", RootArg::Values(vec!["1".into(), "2".into()]));
        assert!(call.is_node_call());
        assert_eq!(call.keys(), vec![RootCallKey::new("nodes", Some("1")), RootCallKey::new("nodes", Some("2"))]);

        let parent = QueryId::next();
        let child = RootQuery::new(
            RootCall::new("node", RootArg::Ref(RefParam::new(parent, "$.*.actor.id"))),
            Vec::new(),
        );
        assert_eq!(child.parent_id(), Some(parent));
        assert!(child.root_call.keys().is_empty());
    }

    #[test]
    fn test_query_ids_are_unique() {
        assert_ne!(QueryId::next(), QueryId::next());
    }
}
