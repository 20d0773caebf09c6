//! Callback registries with explicit unsubscribe handles.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_id: u64,
    callbacks: Vec<(u64, Callback<T>)>,
}

/// A set of observers notified synchronously, outside the registry lock.
pub struct ObserverSet<T> {
    inner: Arc<Mutex<Registry<T>>>,
}

impl<T: 'static> ObserverSet<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Registry { next_id: 0, callbacks: Vec::new() })),
        }
    }

    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = {
            let mut registry = self.inner.lock();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.callbacks.push((id, Arc::new(callback)));
            id
        };

        let weak: Weak<Mutex<Registry<T>>> = Arc::downgrade(&self.inner);
        Subscription {
            remove: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.lock().callbacks.retain(|(existing, _)| *existing != id);
                }
            })),
        }
    }

    pub fn notify(&self, value: &T) {
        // Snapshot first so a callback may subscribe or unsubscribe re-entrantly
        let callbacks: Vec<Callback<T>> = self
            .inner
            .lock()
            .callbacks
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for callback in callbacks {
            callback(value);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: 'static> Default for ObserverSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by every `on_*` registration.
///
/// Dropping it keeps the callback registered; call `unsubscribe` to remove it.
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.remove.is_some())
            .finish()
    }
}
