//! Field call arguments and their pagination subset.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Error;

pub const FIRST: &str = "first";
pub const LAST: &str = "last";
pub const AFTER: &str = "after";
pub const BEFORE: &str = "before";

/// A named argument applied to a field, e.g. `first(10)` or `orderby(TOP_STORIES)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub name: String,
    pub value: Value,
}

impl Call {
    /// Filter call such as `orderby(TOP)`.
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { name: name.into(), value: value.into() }
    }

    pub fn first(count: usize) -> Self {
        Self::new(FIRST, count)
    }

    pub fn last(count: usize) -> Self {
        Self::new(LAST, count)
    }

    pub fn after(cursor: impl Into<String>) -> Self {
        Self::new(AFTER, cursor.into())
    }

    pub fn before(cursor: impl Into<String>) -> Self {
        Self::new(BEFORE, cursor.into())
    }

    /// True for `first`, `last`, `after` and `before`.
    pub fn is_range_call(&self) -> bool {
        matches!(self.name.as_str(), FIRST | LAST | AFTER | BEFORE)
    }

    /// Value rendered for storage keys: strings are written bare.
    pub fn value_string(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Calls that select *which* list is meant, as opposed to which page of it.
pub fn filter_calls(calls: &[Call]) -> Vec<Call> {
    calls.iter().filter(|call| !call.is_range_call()).cloned().collect()
}

/// Canonical key for a set of calls: `orderby(TOP_STORIES).size(32)`.
pub fn calls_key(calls: &[Call]) -> String {
    calls
        .iter()
        .map(|call| format!("{}({})", call.name, call.value_string()))
        .collect::<Vec<_>>()
        .join(".")
}

/// The requested page of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Window {
    /// `first: count` optionally `after: cursor`.
    First { count: usize, after: Option<String> },
    /// `last: count` optionally `before: cursor`.
    Last { count: usize, before: Option<String> },
}

impl Window {
    /// Read the page request out of a connection's calls.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRangeCalls` when `first` and `last` are mixed or both
    /// missing, a count is not a non-negative integer, or a cursor points the
    /// wrong way.
    pub fn from_calls(calls: &[Call]) -> Result<Self, Error> {
        let mut first = None;
        let mut last = None;
        let mut after = None;
        let mut before = None;
        for call in calls {
            match call.name.as_str() {
                FIRST => first = Some(count_value(call)?),
                LAST => last = Some(count_value(call)?),
                AFTER => after = cursor_value(call),
                BEFORE => before = cursor_value(call),
                _ => {}
            }
        }

        match (first, last) {
            (Some(count), None) if before.is_none() => Ok(Window::First { count, after }),
            (None, Some(count)) if after.is_none() => Ok(Window::Last { count, before }),
            (Some(_), Some(_)) => Err(Error::InvalidRangeCalls("`first` and `last` cannot be combined".into())),
            (None, None) => Err(Error::InvalidRangeCalls("connection calls must include `first` or `last`".into())),
            _ => Err(Error::InvalidRangeCalls(
                "`after` pairs with `first` and `before` pairs with `last`".into(),
            )),
        }
    }
}

fn count_value(call: &Call) -> Result<usize, Error> {
    let count = match &call.value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse::<u64>().ok(),
        _ => None,
    };
    count
        .and_then(|c| usize::try_from(c).ok())
        .ok_or_else(|| Error::InvalidRangeCalls(format!("`{}` expects a count, got {}", call.name, call.value)))
}

fn cursor_value(call: &Call) -> Option<String> {
    match &call.value {
        Value::Null => {
            tracing::warn!(call = %call.name, "ignoring null cursor");
            None
        }
        _ => Some(call.value_string()),
    }
}
