//! A small typed pub/sub primitive for change listeners.
//!
//! Emission works on a snapshot of the listener list. A listener removed
//! during an emission is still called in that round; a listener added
//! during an emission is first called on the next one.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Identifies a registered listener.
pub type ListenerId = u64;

type Listener<T> = dyn Fn(&T) + Send + Sync;

/// Typed synchronous event emitter.
///
/// The internal lock is never held while listeners run, so a listener may
/// register or remove listeners.
pub struct EventEmitter<T> {
    listeners: Mutex<Vec<(ListenerId, Arc<Listener<T>>)>>,
    next_id: AtomicU64,
}

impl<T> EventEmitter<T> {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers `callback` and returns its ID.
    pub fn on(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, Arc::new(callback)));
        id
    }

    /// Removes a listener. Unknown IDs are ignored.
    pub fn off(&self, id: ListenerId) {
        self.listeners.lock().retain(|(lid, _)| *lid != id);
    }

    /// Calls every currently registered listener with `event`.
    pub fn emit(&self, event: &T) {
        let snapshot: Vec<Arc<Listener<T>>> = {
            let guard = self.listeners.lock();
            guard.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };
        for cb in snapshot {
            cb(event);
        }
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for EventEmitter<T> {
    fn default() -> Self {
        Self::new()
    }
}
