//! Tracks deferred fragment fetches per (record, fragment).
//!
//! A deferred query is keyed by its root record. When the root is only known
//! through a root call (`viewer`, `username(joe)`) the key stays
//! [`TrackerKey::Pending`] until a response or an explicit
//! [`resolve_root_call`](DeferredQueryTracker::resolve_root_call) names the
//! record, at which point the entries migrate to [`TrackerKey::Resolved`].
//! Ref queries learn their ids only when their parent query resolves.
//!
//! Callbacks are not run inside `resolve_query`/`reject_query`; they are
//! queued and delivered by [`process_broadcasts`](DeferredQueryTracker::process_broadcasts).

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::rc::Rc;

use graphcache_core::Error;
use graphcache_core::record::{DataId, RootCallKey};
use serde_json::Value;

use crate::query::{FragmentId, QueryId, RootArg, RootQuery};

mod listeners;

pub use listeners::{FragmentListener, Subscription};
use listeners::ListenerRegistry;

/// Index key for deferred fragments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TrackerKey {
    /// Root call whose record is not known yet.
    Pending(RootCallKey),
    Resolved(DataId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    Pending,
    Resolved,
    Rejected,
}

/// Ids of ref queries, keyed by query, as extracted from a parent response.
pub type RefParams = HashMap<QueryId, Vec<DataId>>;

#[derive(Debug)]
struct Broadcast {
    data_id: DataId,
    fragment_id: FragmentId,
    failure: Option<String>,
}

#[derive(Debug, Default)]
pub struct DeferredQueryTracker {
    statuses: HashMap<QueryId, QueryStatus>,
    /// Queries still fetching each fragment, per record or root call.
    fragments: HashMap<TrackerKey, HashMap<FragmentId, BTreeSet<QueryId>>>,
    /// Ref queries waiting for their parent, by parent id.
    children: HashMap<QueryId, Vec<RootQuery>>,
    broadcasts: VecDeque<Broadcast>,
    listeners: Rc<RefCell<ListenerRegistry>>,
}

fn response_id(value: &Value) -> Option<DataId> {
    match value.get("id")? {
        Value::String(id) => Some(DataId::new(id.as_str())),
        Value::Number(id) => Some(DataId::new(id.to_string())),
        _ => None,
    }
}

impl DeferredQueryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query_status(&self, query_id: QueryId) -> Option<QueryStatus> {
        self.statuses.get(&query_id).copied()
    }

    /// Start tracking `query` as pending.
    ///
    /// `resolve_root` maps a root call to its record id when one is known.
    pub fn record_query(
        &mut self,
        query: &RootQuery,
        resolve_root: impl Fn(&RootCallKey) -> Option<DataId>,
    ) -> Result<(), Error> {
        if self.statuses.contains_key(&query.id) {
            return Err(Error::QueryAlreadyTracked(query.id.to_string()));
        }
        self.statuses.insert(query.id, QueryStatus::Pending);

        if let Some(parent_id) = query.parent_id() {
            self.children.entry(parent_id).or_default().push(query.clone());
            return Ok(());
        }
        if !query.deferred {
            return Ok(());
        }

        let fragment_ids = query.deferred_fragment_ids();
        for root_key in query.root_call.keys() {
            let key = match resolve_root(&root_key) {
                Some(id) => TrackerKey::Resolved(id),
                None => TrackerKey::Pending(root_key),
            };
            self.track_fragments(key, &fragment_ids, query.id);
        }
        Ok(())
    }

    fn track_fragments(&mut self, key: TrackerKey, fragment_ids: &[FragmentId], query_id: QueryId) {
        let fragments = self.fragments.entry(key).or_default();
        for fragment_id in fragment_ids {
            fragments.entry(fragment_id.clone()).or_default().insert(query_id);
        }
    }

    /// Mark `query` resolved.
    ///
    /// `response` is the root payload; it names root-call records and, for a
    /// parent query, the ids of its ref children unless `ref_params` already
    /// lists them.
    pub fn resolve_query(
        &mut self,
        query: &RootQuery,
        response: Option<&Value>,
        ref_params: Option<&RefParams>,
    ) -> Result<(), Error> {
        self.finish(query, QueryStatus::Resolved)?;
        if let Some(response) = response {
            self.learn_root_ids(query, response);
        }
        self.release_fragments(query.id, None);

        for child in self.children.remove(&query.id).unwrap_or_default() {
            if self.statuses.get(&child.id) != Some(&QueryStatus::Pending) || !child.deferred {
                continue;
            }
            let ids = match (ref_params.and_then(|params| params.get(&child.id)), &child.root_call.arg, response) {
                (Some(ids), _, _) => ids.clone(),
                (None, RootArg::Ref(param), Some(response)) => param.resolve(response),
                _ => Vec::new(),
            };
            let fragment_ids = child.deferred_fragment_ids();
            for id in ids {
                self.track_fragments(TrackerKey::Resolved(id), &fragment_ids, child.id);
            }
        }
        Ok(())
    }

    /// Mark `query` rejected. Listeners of its fragments receive `error`, and
    /// ref children waiting on it are dropped.
    pub fn reject_query(&mut self, query: &RootQuery, error: &Error) -> Result<(), Error> {
        self.finish(query, QueryStatus::Rejected)?;
        let message = match error {
            Error::QueryFailed(message) => message.clone(),
            other => other.to_string(),
        };
        self.release_fragments(query.id, Some(message));

        for child in self.children.remove(&query.id).unwrap_or_default() {
            self.statuses.insert(child.id, QueryStatus::Rejected);
        }
        Ok(())
    }

    fn finish(&mut self, query: &RootQuery, status: QueryStatus) -> Result<(), Error> {
        match self.statuses.get_mut(&query.id) {
            Some(current) if *current == QueryStatus::Pending => {
                *current = status;
                Ok(())
            }
            _ => Err(Error::QueryNotPending(query.id.to_string())),
        }
    }

    fn learn_root_ids(&mut self, query: &RootQuery, response: &Value) {
        let Some(entries) = response.as_object() else {
            return;
        };
        for root_key in query.root_call.keys() {
            let entry = match &root_key.arg {
                Some(arg) if entries.contains_key(arg) => entries.get(arg),
                _ if entries.len() == 1 => entries.values().next(),
                _ => None,
            };
            if let Some(id) = entry.and_then(response_id) {
                self.resolve_root_call(&root_key, &id);
            }
        }
    }

    /// Remove `query_id` from every fragment it fetches. A fragment with no
    /// query left is dropped, and a broadcast is queued if its record is known.
    fn release_fragments(&mut self, query_id: QueryId, failure: Option<String>) {
        let mut released = Vec::new();
        self.fragments.retain(|key, fragments| {
            fragments.retain(|fragment_id, queries| {
                if !queries.remove(&query_id) || !queries.is_empty() {
                    return true;
                }
                if let TrackerKey::Resolved(data_id) = key {
                    released.push((data_id.clone(), fragment_id.clone()));
                }
                false
            });
            !fragments.is_empty()
        });
        released.sort();
        for (data_id, fragment_id) in released {
            self.broadcasts.push_back(Broadcast { data_id, fragment_id, failure: failure.clone() });
        }
    }

    /// Re-key everything pending on `key` to the record `data_id`.
    pub fn resolve_root_call(&mut self, key: &RootCallKey, data_id: &DataId) {
        let Some(pending) = self.fragments.remove(&TrackerKey::Pending(key.clone())) else {
            return;
        };
        tracing::debug!(root_call = %key, %data_id, "resolved deferred root call");
        let resolved = self.fragments.entry(TrackerKey::Resolved(data_id.clone())).or_default();
        for (fragment_id, queries) in pending {
            resolved.entry(fragment_id).or_default().extend(queries);
        }
    }

    /// Whether a deferred fetch for this record and fragment is outstanding.
    ///
    /// Fragments whose record is not known yet report `false`.
    pub fn is_query_pending(&self, data_id: &DataId, fragment_id: &str) -> bool {
        self.fragments
            .get(&TrackerKey::Resolved(data_id.clone()))
            .is_some_and(|fragments| fragments.contains_key(fragment_id))
    }

    pub fn add_listener_for_fragment(
        &mut self,
        data_id: &DataId,
        fragment_id: &str,
        listener: FragmentListener,
    ) -> Subscription {
        let id = self.listeners.borrow_mut().add(data_id.clone(), fragment_id.to_string(), listener);
        Subscription::new(id, &self.listeners)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    pub fn has_pending_broadcasts(&self) -> bool {
        !self.broadcasts.is_empty()
    }

    /// Deliver queued outcomes to listeners in registration order.
    ///
    /// Listeners removed before or during delivery are skipped.
    pub fn process_broadcasts(&mut self) {
        while let Some(broadcast) = self.broadcasts.pop_front() {
            let ids = self.listeners.borrow().matching(&broadcast.data_id, &broadcast.fragment_id);
            for id in ids {
                let Some(mut listener) = self.listeners.borrow_mut().take(id) else {
                    continue;
                };
                listener.notify(&broadcast.data_id, &broadcast.fragment_id, broadcast.failure.as_deref().map_or(Ok(()), Err));
                self.listeners.borrow_mut().restore(id, listener);
            }
        }
    }

    /// Forget every tracked query and queued broadcast. Subscriptions stay registered.
    pub fn reset(&mut self) {
        self.statuses.clear();
        self.fragments.clear();
        self.children.clear();
        self.broadcasts.clear();
    }
}
