//! Listener registry and change broadcasting.

use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

use super::types::{
    ChangeFilter, DropReason, ListenerId, StoreChange, StoreEvent, SubscriptionConfig,
    SubscriptionHandle,
};

/// Callback invoked synchronously for every matching change.
pub type ListenerFn = Arc<dyn Fn(&StoreChange) + Send + Sync>;

enum Sink {
    Callback(ListenerFn),
    Channel(Sender<StoreEvent>),
}

struct Listener {
    filter: ChangeFilter,
    sink: Sink,
}

impl Listener {
    /// Deliver a change. Returns the reason if the listener must be dropped.
    fn deliver(&self, change: &StoreChange) -> Option<DropReason> {
        let change = self.filter.apply(change)?;
        match &self.sink {
            Sink::Callback(callback) => {
                callback(&change);
                None
            }
            Sink::Channel(sender) => match sender.try_send(StoreEvent::Change { change }) {
                Ok(()) => None,
                Err(TrySendError::Full(_)) => Some(DropReason::BufferOverflow),
                Err(TrySendError::Disconnected(_)) => Some(DropReason::Disconnected),
            },
        }
    }

    fn notify_dropped(&self, reason: DropReason) {
        if let Sink::Channel(sender) = &self.sink {
            // Best effort: the buffer may still be full.
            let _ = sender.try_send(StoreEvent::Dropped { reason });
        }
    }
}

/// Manages listeners and broadcasts committed changes.
///
/// Listeners are called in registration order. The registry lock is not held
/// while callbacks run, so a callback may register or remove listeners.
pub struct SubscriptionManager {
    listeners: RwLock<BTreeMap<ListenerId, Arc<Listener>>>,
    next_id: AtomicU64,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn register(&self, filter: ChangeFilter, sink: Sink) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.listeners
            .write()
            .insert(id, Arc::new(Listener { filter, sink }));
        id
    }

    /// Register a callback.
    pub fn listen<F>(&self, filter: ChangeFilter, callback: F) -> ListenerId
    where
        F: Fn(&StoreChange) + Send + Sync + 'static,
    {
        self.register(filter, Sink::Callback(Arc::new(callback)))
    }

    /// Create a bounded channel subscription.
    pub fn subscribe(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        let (sender, receiver) = bounded(config.buffer_size);
        let id = self.register(config.filter, Sink::Channel(sender));
        SubscriptionHandle { id, receiver }
    }

    /// Remove a listener or subscription. Returns false if it was not found.
    pub fn remove(&self, id: ListenerId) -> bool {
        match self.listeners.write().remove(&id) {
            Some(listener) => {
                listener.notify_dropped(DropReason::Unsubscribed);
                true
            }
            None => false,
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Deliver a change to every matching listener. Drops subscribers that
    /// cannot keep up.
    pub fn broadcast(&self, change: &StoreChange) {
        let listeners: Vec<(ListenerId, Arc<Listener>)> = self
            .listeners
            .read()
            .iter()
            .map(|(id, l)| (*id, Arc::clone(l)))
            .collect();

        let mut to_remove = Vec::new();
        for (id, listener) in listeners {
            if let Some(reason) = listener.deliver(change) {
                to_remove.push((id, reason));
            }
        }

        if !to_remove.is_empty() {
            let mut registry = self.listeners.write();
            for (id, reason) in to_remove {
                if let Some(listener) = registry.remove(&id) {
                    warn!(listener = id.0, ?reason, "dropping subscriber");
                    listener.notify_dropped(reason);
                }
            }
        }
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}
