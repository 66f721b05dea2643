//! State change subscriptions.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use weft_core::LogKey;

use crate::document::FieldChange;

/// The visible effect of applying one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub log_key: LogKey,
    pub index: u64,
    pub fields: Vec<FieldChange>,
}

type Listener = Arc<dyn Fn(&StateChange) + Send + Sync>;

/// Registered listeners.
#[derive(Default)]
pub struct SubscriptionRegistry {
    next_id: AtomicU64,
    listeners: Mutex<BTreeMap<u64, Listener>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register `listener`. It stays registered until the returned handle
    /// is dropped.
    pub fn subscribe<F>(self: &Arc<Self>, listener: F) -> Subscription
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(id, Arc::new(listener));
        Subscription {
            id,
            registry: Arc::downgrade(self),
        }
    }

    /// Call every listener with `change`.
    pub fn notify(&self, change: &StateChange) {
        // Listeners may drop subscriptions, so call them unlocked.
        let listeners: Vec<Listener> = self.lock().values().cloned().collect();
        for listener in listeners {
            listener(change);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, id: u64) {
        self.lock().remove(&id);
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<u64, Listener>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Keeps a listener registered. Unsubscribes on drop.
#[must_use = "the listener is removed when the subscription is dropped"]
pub struct Subscription {
    id: u64,
    registry: Weak<SubscriptionRegistry>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn change() -> StateChange {
        StateChange {
            log_key: LogKey::from_bytes([1; 32]),
            index: 0,
            fields: Vec::new(),
        }
    }

    #[test]
    fn test_drop_unsubscribes() {
        let registry = SubscriptionRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let sub = registry.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        registry.notify(&change());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        drop(sub);
        assert!(registry.is_empty());
        registry.notify(&change());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_outlives_registry() {
        let registry = SubscriptionRegistry::new();
        let sub = registry.subscribe(|_| {});
        drop(registry);
        drop(sub);
    }
}
