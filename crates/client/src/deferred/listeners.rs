//! Fragment listeners and their one-shot subscriptions.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use graphcache_core::Error;
use graphcache_core::record::DataId;

use crate::query::FragmentId;

type SuccessCallback = Box<dyn FnMut(&DataId, &FragmentId)>;
type FailureCallback = Box<dyn FnMut(&DataId, &FragmentId, &Error)>;

/// Callbacks for the outcome of a deferred fragment fetch.
pub struct FragmentListener {
    on_success: SuccessCallback,
    on_failure: FailureCallback,
}

impl FragmentListener {
    pub fn new(
        on_success: impl FnMut(&DataId, &FragmentId) + 'static,
        on_failure: impl FnMut(&DataId, &FragmentId, &Error) + 'static,
    ) -> Self {
        Self { on_success: Box::new(on_success), on_failure: Box::new(on_failure) }
    }

    pub(super) fn notify(&mut self, data_id: &DataId, fragment_id: &FragmentId, outcome: Result<(), &str>) {
        match outcome {
            Ok(()) => (self.on_success)(data_id, fragment_id),
            Err(message) => (self.on_failure)(data_id, fragment_id, &Error::QueryFailed(message.to_string())),
        }
    }
}

impl std::fmt::Debug for FragmentListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FragmentListener").finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct Entry {
    data_id: DataId,
    fragment_id: FragmentId,
    /// Taken out while the callback runs.
    listener: Option<FragmentListener>,
}

/// Listeners in registration order.
#[derive(Debug, Default)]
pub(super) struct ListenerRegistry {
    next_id: u64,
    entries: BTreeMap<u64, Entry>,
}

impl ListenerRegistry {
    pub(super) fn add(&mut self, data_id: DataId, fragment_id: FragmentId, listener: FragmentListener) -> u64 {
        self.next_id += 1;
        self.entries.insert(self.next_id, Entry { data_id, fragment_id, listener: Some(listener) });
        self.next_id
    }

    pub(super) fn remove(&mut self, id: u64) {
        self.entries.remove(&id);
    }

    pub(super) fn matching(&self, data_id: &DataId, fragment_id: &FragmentId) -> Vec<u64> {
        self.entries
            .iter()
            .filter(|(_, entry)| &entry.data_id == data_id && &entry.fragment_id == fragment_id)
            .map(|(id, _)| *id)
            .collect()
    }

    pub(super) fn take(&mut self, id: u64) -> Option<FragmentListener> {
        self.entries.get_mut(&id).and_then(|entry| entry.listener.take())
    }

    /// Put a listener back unless it was removed while it ran.
    pub(super) fn restore(&mut self, id: u64, listener: FragmentListener) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.listener = Some(listener);
        }
    }

    pub(super) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Handle returned by [`add_listener_for_fragment`](super::DeferredQueryTracker::add_listener_for_fragment).
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    registry: Weak<RefCell<ListenerRegistry>>,
    removed: Cell<bool>,
}

impl Subscription {
    pub(super) fn new(id: u64, registry: &Rc<RefCell<ListenerRegistry>>) -> Self {
        Self { id, registry: Rc::downgrade(registry), removed: Cell::new(false) }
    }

    /// Stop receiving callbacks. Calling this twice is an error.
    pub fn remove(&self) -> Result<(), Error> {
        if self.removed.replace(true) {
            return Err(Error::ListenerRemoved);
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.borrow_mut().remove(self.id);
        }
        Ok(())
    }
}
