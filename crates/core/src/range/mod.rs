//! Pagination state for connection records.
//!
//! A [`Range`] holds one logical edge list per *filtered view*, keyed by the
//! filter calls of the requesting field (`orderby(TOP_STORIES)`). Each view
//! tracks what is known about the list as two contiguous segments:
//!
//! - a head, anchored at the start of the list (`first`/`after` fetches)
//! - a tail, anchored at the end of the list (`last`/`before` fetches)
//!
//! Once the segments overlap, or a fetch reports no further pages, the head
//! spans the whole list and the view is complete.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::Error;
use crate::record::{DataId, RangeOps};

pub mod calls;

pub use calls::{Call, Window, calls_key, filter_calls};

/// One edge of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeEdge {
    pub edge_id: DataId,
    pub node_id: DataId,
    pub cursor: Option<String>,
}

/// Paging flags as reported by the server or computed for a window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub has_next_page: bool,
    pub has_previous_page: bool,
}

/// Incremental edit applied to every view of a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOperation {
    Append,
    Prepend,
    Remove,
}

/// Edges satisfying a window plus what is still missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RangeInfo {
    pub edge_ids: Vec<DataId>,
    /// Pagination calls that would fetch the missing part; empty when satisfied.
    pub diff_calls: Vec<Call>,
    pub page_info: PageInfo,
}

/// Known segments of one filtered list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RangeView {
    head: Vec<RangeEdge>,
    tail: Vec<RangeEdge>,
    complete: bool,
    page_info: PageInfo,
}

fn cursor_position(edges: &[RangeEdge], cursor: &str) -> Option<usize> {
    edges.iter().position(|edge| edge.cursor.as_deref() == Some(cursor))
}

fn edge_position(edges: &[RangeEdge], edge_id: &DataId) -> Option<usize> {
    edges.iter().position(|edge| &edge.edge_id == edge_id)
}

fn extend_unique(target: &mut Vec<RangeEdge>, items: Vec<RangeEdge>) {
    for item in items {
        if edge_position(target, &item.edge_id).is_none() {
            target.push(item);
        }
    }
}

/// `front` followed by `back`, dropping entries of `front` that `back` repeats.
fn join_preferring_back(mut front: Vec<RangeEdge>, back: Vec<RangeEdge>) -> Vec<RangeEdge> {
    front.retain(|edge| edge_position(&back, &edge.edge_id).is_none());
    front.extend(back);
    front
}

impl RangeView {
    /// Every edge this view knows, head first.
    pub fn edges(&self) -> impl Iterator<Item = &RangeEdge> {
        self.head.iter().chain(self.tail.iter())
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Flags from the most recent fetch into this view.
    pub fn page_info(&self) -> PageInfo {
        self.page_info
    }

    fn add_first(&mut self, after: Option<&str>, edges: Vec<RangeEdge>, reaches_end: bool) -> bool {
        let Some(cursor) = after else {
            if reaches_end {
                self.head = edges;
                self.tail.clear();
                self.complete = true;
                return true;
            }
            let overlap = edges.last().and_then(|last| edge_position(&self.head, &last.edge_id));
            let rest = overlap.map(|i| self.head.split_off(i + 1)).unwrap_or_default();
            self.complete = self.complete && overlap.is_some();
            let mut head = edges;
            extend_unique(&mut head, rest);
            self.head = head;
            self.try_merge();
            return true;
        };

        if let Some(i) = cursor_position(&self.head, cursor) {
            self.head.truncate(i + 1);
            extend_unique(&mut self.head, edges);
            if reaches_end {
                self.complete = true;
                self.tail.clear();
            } else {
                self.complete = false;
                self.try_merge();
            }
            true
        } else if let Some(i) = cursor_position(&self.tail, cursor) {
            self.tail.truncate(i + 1);
            extend_unique(&mut self.tail, edges);
            self.try_merge();
            true
        } else {
            false
        }
    }

    fn add_last(&mut self, before: Option<&str>, edges: Vec<RangeEdge>, reaches_start: bool) -> bool {
        let Some(cursor) = before else {
            if reaches_start {
                self.head = edges;
                self.tail.clear();
                self.complete = true;
                return true;
            }
            if self.complete {
                if let Some(i) = edges.first().and_then(|first| edge_position(&self.head, &first.edge_id)) {
                    self.head.truncate(i);
                    extend_unique(&mut self.head, edges);
                    return true;
                }
                self.complete = false;
                self.head.retain(|edge| edge_position(&edges, &edge.edge_id).is_none());
                self.tail = edges;
                self.try_merge();
                return true;
            }
            let overlap = edges.first().and_then(|first| edge_position(&self.tail, &first.edge_id));
            let prefix = match overlap {
                Some(i) => {
                    self.tail.truncate(i);
                    std::mem::take(&mut self.tail)
                }
                None => Vec::new(),
            };
            self.tail = join_preferring_back(prefix, edges);
            self.try_merge();
            return true;
        };

        if !self.complete
            && let Some(i) = cursor_position(&self.tail, cursor)
        {
            let rest = self.tail.split_off(i);
            let mut segment = edges;
            extend_unique(&mut segment, rest);
            if reaches_start {
                self.head = segment;
                self.tail.clear();
                self.complete = true;
            } else {
                self.tail = segment;
                self.try_merge();
            }
            true
        } else if let Some(i) = cursor_position(&self.head, cursor) {
            let rest = self.head.split_off(i);
            let front = if reaches_start { Vec::new() } else { std::mem::take(&mut self.head) };
            let mut head = join_preferring_back(front, edges);
            extend_unique(&mut head, rest);
            self.head = head;
            true
        } else {
            false
        }
    }

    fn try_merge(&mut self) {
        if self.complete || self.tail.is_empty() {
            return;
        }
        let head_overlap = self.tail.first().and_then(|first| edge_position(&self.head, &first.edge_id));
        if let Some(i) = head_overlap {
            self.head.truncate(i);
            let tail = std::mem::take(&mut self.tail);
            extend_unique(&mut self.head, tail);
            self.complete = true;
            return;
        }
        let tail_overlap = self.head.last().and_then(|last| edge_position(&self.tail, &last.edge_id));
        if let Some(j) = tail_overlap {
            let rest = self.tail.split_off(j + 1);
            self.tail.clear();
            extend_unique(&mut self.head, rest);
            self.complete = true;
        }
    }

    fn remove_edge(&mut self, edge_id: &DataId) -> bool {
        let before = self.head.len() + self.tail.len();
        self.head.retain(|edge| &edge.edge_id != edge_id);
        self.tail.retain(|edge| &edge.edge_id != edge_id);
        before != self.head.len() + self.tail.len()
    }

    fn apply(&mut self, operation: RangeOperation, edge: &RangeEdge) {
        match operation {
            RangeOperation::Prepend => {
                if self.complete || !self.head.is_empty() {
                    self.remove_edge(&edge.edge_id);
                    self.head.insert(0, edge.clone());
                }
            }
            RangeOperation::Append => {
                if self.complete {
                    self.remove_edge(&edge.edge_id);
                    self.head.push(edge.clone());
                } else if !self.tail.is_empty() {
                    self.remove_edge(&edge.edge_id);
                    self.tail.push(edge.clone());
                }
            }
            RangeOperation::Remove => {
                self.remove_edge(&edge.edge_id);
            }
        }
    }

    fn retrieve_first(&self, count: usize, after: Option<&str>, ops: &RangeOps) -> RangeInfo {
        let (segment, at_end) = match after {
            None => (self.head.as_slice(), self.complete),
            Some(cursor) => {
                if let Some(i) = cursor_position(&self.head, cursor) {
                    (&self.head[i + 1..], self.complete)
                } else if let Some(i) = cursor_position(&self.tail, cursor) {
                    (&self.tail[i + 1..], true)
                } else {
                    tracing::warn!(cursor, "cursor not found in range");
                    return RangeInfo::default();
                }
            }
        };

        let mut ids: Vec<DataId> = Vec::new();
        if after.is_none() {
            push_visible(&mut ids, ops.prepend.iter(), ops);
        }
        push_visible(&mut ids, segment.iter().map(|edge| &edge.edge_id), ops);
        if at_end {
            push_visible(&mut ids, ops.append.iter(), ops);
        }

        let known = ids.len();
        let mut info = RangeInfo {
            page_info: PageInfo { has_previous_page: after.is_some(), ..PageInfo::default() },
            ..RangeInfo::default()
        };
        if known >= count {
            ids.truncate(count);
            info.page_info.has_next_page = known > count || !at_end;
        } else if !at_end {
            info.page_info.has_next_page = true;
            info.diff_calls.push(Call::first(count - known));
            let cursor = segment.last().and_then(|edge| edge.cursor.clone()).or_else(|| after.map(str::to_string));
            if let Some(cursor) = cursor {
                info.diff_calls.push(Call::after(cursor));
            }
        }
        info.edge_ids = ids;
        info
    }

    fn retrieve_last(&self, count: usize, before: Option<&str>, ops: &RangeOps) -> RangeInfo {
        let (segment, at_start) = match before {
            None if self.complete => (self.head.as_slice(), true),
            None => (self.tail.as_slice(), false),
            Some(cursor) => {
                let in_tail = if self.complete { None } else { cursor_position(&self.tail, cursor) };
                if let Some(i) = in_tail {
                    (&self.tail[..i], false)
                } else if let Some(i) = cursor_position(&self.head, cursor) {
                    (&self.head[..i], true)
                } else {
                    tracing::warn!(cursor, "cursor not found in range");
                    return RangeInfo::default();
                }
            }
        };

        let mut ids: Vec<DataId> = Vec::new();
        if at_start {
            push_visible(&mut ids, ops.prepend.iter(), ops);
        }
        push_visible(&mut ids, segment.iter().map(|edge| &edge.edge_id), ops);
        if before.is_none() {
            push_visible(&mut ids, ops.append.iter(), ops);
        }

        let known = ids.len();
        let mut info = RangeInfo {
            page_info: PageInfo { has_next_page: before.is_some(), ..PageInfo::default() },
            ..RangeInfo::default()
        };
        if known >= count {
            ids.drain(..known - count);
            info.page_info.has_previous_page = known > count || !at_start;
        } else if !at_start {
            info.page_info.has_previous_page = true;
            info.diff_calls.push(Call::last(count - known));
            let cursor = segment.first().and_then(|edge| edge.cursor.clone()).or_else(|| before.map(str::to_string));
            if let Some(cursor) = cursor {
                info.diff_calls.push(Call::before(cursor));
            }
        }
        info.edge_ids = ids;
        info
    }
}

fn push_visible<'a>(ids: &mut Vec<DataId>, candidates: impl Iterator<Item = &'a DataId>, ops: &RangeOps) {
    for id in candidates {
        if !ops.remove.contains(id) && !ids.contains(id) {
            ids.push(id.clone());
        }
    }
}

/// Pagination state attached to a connection record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Range {
    filter_calls: Vec<Call>,
    force_index: u64,
    views: BTreeMap<String, RangeView>,
}

impl Range {
    pub fn new(filter_calls: Vec<Call>, force_index: u64) -> Self {
        Self { filter_calls, force_index, views: BTreeMap::new() }
    }

    pub fn filter_calls(&self) -> &[Call] {
        &self.filter_calls
    }

    pub fn force_index(&self) -> u64 {
        self.force_index
    }

    /// View for the given request calls; pagination calls are ignored.
    pub fn view(&self, calls: &[Call]) -> Option<&RangeView> {
        self.views.get(&calls_key(&filter_calls(calls)))
    }

    pub fn views(&self) -> impl Iterator<Item = &RangeView> {
        self.views.values()
    }

    /// Install the edges of a concrete fetch into the view implied by `calls`.
    ///
    /// Returns false when the fetch was anchored at a cursor the view does not
    /// know; the edges are then dropped.
    pub fn add_items(&mut self, calls: &[Call], edges: Vec<RangeEdge>, page_info: PageInfo) -> Result<bool, Error> {
        let window = Window::from_calls(calls)?;
        let view = self.views.entry(calls_key(&filter_calls(calls))).or_default();
        let added = match &window {
            Window::First { after, .. } => view.add_first(after.as_deref(), edges, !page_info.has_next_page),
            Window::Last { before, .. } => view.add_last(before.as_deref(), edges, !page_info.has_previous_page),
        };
        if added {
            view.page_info = page_info;
        } else {
            tracing::warn!(?window, "range fetch anchored at an unknown cursor; edges dropped");
        }
        Ok(added)
    }

    /// Resolve which edges satisfy `calls`, folding in optimistic edits.
    pub fn retrieve(&self, calls: &[Call], ops: Option<&RangeOps>) -> Result<RangeInfo, Error> {
        let window = Window::from_calls(calls)?;
        let empty_view = RangeView::default();
        let empty_ops = RangeOps::default();
        let view = self.view(calls).unwrap_or(&empty_view);
        let ops = ops.unwrap_or(&empty_ops);
        Ok(match &window {
            Window::First { count, after } => view.retrieve_first(*count, after.as_deref(), ops),
            Window::Last { count, before } => view.retrieve_last(*count, before.as_deref(), ops),
        })
    }

    /// Apply an edit to every view whose known segments reach the affected end.
    pub fn apply(&mut self, operation: RangeOperation, edge: &RangeEdge) {
        for view in self.views.values_mut() {
            view.apply(operation, edge);
        }
    }

    pub fn remove_edge(&mut self, edge_id: &DataId) -> bool {
        let mut removed = false;
        for view in self.views.values_mut() {
            removed |= view.remove_edge(edge_id);
        }
        removed
    }

    /// Whether any view still holds an edge to `node_id`.
    pub fn contains_node(&self, node_id: &DataId) -> bool {
        self.views.values().any(|view| view.edges().any(|edge| &edge.node_id == node_id))
    }

    pub fn edge_ids(&self) -> Vec<&DataId> {
        let mut ids: Vec<&DataId> = Vec::new();
        for edge in self.views.values().flat_map(|view| view.edges()) {
            if !ids.contains(&&edge.edge_id) {
                ids.push(&edge.edge_id);
            }
        }
        ids
    }
}
