//! Refresh listeners with disposable registrations

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Observer notified whenever a runner's state may have changed
///
/// The notification carries no payload; observers re-query the runner.
/// Redundant refreshes are expected. Callbacks may run on solver worker
/// tasks and must hand any UI work off to their own thread.
pub trait RunnerListener: Send + Sync {
    fn runner_refresh(&self);
}

impl<F> RunnerListener for F
where
    F: Fn() + Send + Sync,
{
    fn runner_refresh(&self) {
        self();
    }
}

type Slots = Mutex<Vec<(u64, Arc<dyn RunnerListener>)>>;

/// Set of registered listeners
pub(crate) struct ListenerSet {
    slots: Arc<Slots>,
    next_id: AtomicU64,
}

impl ListenerSet {
    pub(crate) fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(0),
        }
    }

    pub(crate) fn add(&self, listener: Arc<dyn RunnerListener>) -> ListenerRegistration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.slots.lock().push((id, listener));
        ListenerRegistration {
            slots: Arc::downgrade(&self.slots),
            id,
        }
    }

    /// Call every listener; the set is not locked during the callbacks
    pub(crate) fn notify(&self) {
        let snapshot: Vec<Arc<dyn RunnerListener>> =
            self.slots.lock().iter().map(|(_, l)| Arc::clone(l)).collect();
        for listener in snapshot {
            listener.runner_refresh();
        }
    }

    pub(crate) fn clear(&self) {
        self.slots.lock().clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.lock().len()
    }
}

/// Keeps a listener registered until disposed or dropped
#[must_use = "dropping the registration removes the listener"]
pub struct ListenerRegistration {
    slots: Weak<Slots>,
    id: u64,
}

impl ListenerRegistration {
    /// Remove the listener now
    pub fn dispose(self) {}

    /// Whether the listener is still registered
    pub fn is_active(&self) -> bool {
        self.slots
            .upgrade()
            .is_some_and(|slots| slots.lock().iter().any(|(id, _)| *id == self.id))
    }
}

impl Drop for ListenerRegistration {
    fn drop(&mut self) {
        if let Some(slots) = self.slots.upgrade() {
            slots.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

impl std::fmt::Debug for ListenerRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistration")
            .field("id", &self.id)
            .finish()
    }
}
