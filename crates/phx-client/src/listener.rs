//! Copy-on-write listener registries.
//!
//! Registration and removal replace the whole list; dispatch works on a
//! snapshot taken under a short read lock. A callback may therefore register
//! or unregister listeners (including itself) while being notified.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

/// Identifies one registration, returned by [`Listeners::register`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A shared callback receiving events of type `E`.
pub type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Set of callbacks notified in registration order.
pub struct Listeners<E> {
    entries: RwLock<Arc<Vec<(ListenerId, Callback<E>)>>>,
    next_id: AtomicU64,
}

impl<E> Default for Listeners<E> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(Arc::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<E> Listeners<E> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `callback`. Registering the same `Arc` again returns the existing id.
    pub fn register(&self, callback: Callback<E>) -> ListenerId {
        let mut entries = self.entries.write();
        if let Some((id, _)) = entries.iter().find(|(_, cb)| Arc::ptr_eq(cb, &callback)) {
            return *id;
        }
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut next = Vec::with_capacity(entries.len() + 1);
        next.extend(entries.iter().cloned());
        next.push((id, callback));
        *entries = Arc::new(next);
        id
    }

    /// Remove a registration. Returns whether it was present.
    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.write();
        if !entries.iter().any(|(existing, _)| *existing == id) {
            return false;
        }
        let next: Vec<_> = entries
            .iter()
            .filter(|(existing, _)| *existing != id)
            .cloned()
            .collect();
        *entries = Arc::new(next);
        true
    }

    /// Invoke every callback registered at the time of the call.
    pub fn notify(&self, event: &E) {
        let snapshot = Arc::clone(&self.entries.read());
        for (_, callback) in snapshot.iter() {
            callback(event);
        }
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no callbacks are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl<E> std::fmt::Debug for Listeners<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners").field("len", &self.len()).finish()
    }
}
