//! Tagged-event dispatch table
//!
//! Maps an [`EventKind`] to the listener closures interested in it. Listeners
//! are invoked synchronously, in registration order, by whoever drives
//! [`CallbackManager::dispatch`] (normally the event bridge's pump).
//!
//! Every registration is represented by a [`Subscription`] guard. Releasing
//! the guard, explicitly or by dropping it, removes the listener exactly once.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use crate::events::{Callback, ClientEvent, EventKind};

type Listener = Box<dyn FnMut(&ClientEvent) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct DispatchTable {
    next_id: u64,
    listeners: HashMap<EventKind, Vec<(SubscriptionId, Listener)>>,
}

impl DispatchTable {
    fn insert(&mut self, kind: EventKind, listener: Listener) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.listeners.entry(kind).or_default().push((id, listener));
        id
    }

    fn remove(&mut self, kind: &EventKind, id: SubscriptionId) -> bool {
        let Some(entries) = self.listeners.get_mut(kind) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            self.listeners.remove(kind);
        }
        removed
    }
}

// ----------------------------------------------------------------------------
// Callback Manager
// ----------------------------------------------------------------------------

/// Dispatch table shared between a session and its subscription guards
#[derive(Clone, Default)]
pub struct CallbackManager {
    table: Arc<Mutex<DispatchTable>>,
}

impl CallbackManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed handler for `E`.
    ///
    /// The handler runs while the table is locked; it must not subscribe or
    /// release other listeners on this manager.
    pub fn subscribe<E, F>(&self, mut handler: F) -> Subscription
    where
        E: Callback,
        F: FnMut(E) + Send + 'static,
    {
        self.subscribe_raw(E::kind(), move |event| {
            if let Some(payload) = E::from_event(event) {
                handler(payload);
            }
        })
    }

    /// Register an untyped listener for every event of `kind`
    pub fn subscribe_raw<F>(&self, kind: EventKind, listener: F) -> Subscription
    where
        F: FnMut(&ClientEvent) + Send + 'static,
    {
        let id = self.table.lock().insert(kind, Box::new(listener));
        debug!("Subscribed {:?} to {}", id, kind);

        Subscription {
            id,
            kind,
            table: Arc::downgrade(&self.table),
            released: false,
        }
    }

    /// Invoke every listener registered for the event's kind.
    ///
    /// Returns how many listeners saw the event.
    pub fn dispatch(&self, event: &ClientEvent) -> usize {
        let mut table = self.table.lock();
        let mut invoked = 0;

        for (kind, entries) in table.listeners.iter_mut() {
            if !event.matches(kind) {
                continue;
            }
            for (_, listener) in entries.iter_mut() {
                listener(event);
                invoked += 1;
            }
        }

        invoked
    }

    /// Number of live listeners for `kind`
    pub fn listener_count(&self, kind: &EventKind) -> usize {
        self.table
            .lock()
            .listeners
            .get(kind)
            .map_or(0, |entries| entries.len())
    }

    /// Number of live listeners across all kinds
    pub fn total_listeners(&self) -> usize {
        self.table.lock().listeners.values().map(Vec::len).sum()
    }
}

// ----------------------------------------------------------------------------
// Subscription Guard
// ----------------------------------------------------------------------------

/// Exclusive handle to one registered listener
#[must_use = "dropping a subscription releases it immediately"]
pub struct Subscription {
    id: SubscriptionId,
    kind: EventKind,
    table: Weak<Mutex<DispatchTable>>,
    released: bool,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Remove the listener now instead of at end of scope
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        // The manager may already be gone along with its session
        if let Some(table) = self.table.upgrade() {
            if table.lock().remove(&self.kind, self.id) {
                debug!("Released {:?} from {}", self.id, self.kind);
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_once();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Connected, LoggedOn};
    use crate::state::ResultCode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl FnMut(Connected) + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = Arc::clone(&count);
        (count, move |_| {
            handle.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_dispatch_reaches_only_matching_kind() {
        let manager = CallbackManager::new();
        let (count, handler) = counter();
        let _subscription = manager.subscribe::<Connected, _>(handler);

        assert_eq!(manager.dispatch(&ClientEvent::Connected(Connected)), 1);
        assert_eq!(
            manager.dispatch(&ClientEvent::LoggedOn(LoggedOn {
                result: ResultCode::Ok
            })),
            0
        );
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_releases_subscription() {
        let manager = CallbackManager::new();
        let (count, handler) = counter();

        {
            let _subscription = manager.subscribe::<Connected, _>(handler);
            assert_eq!(manager.listener_count(&EventKind::Connected), 1);
        }

        assert_eq!(manager.listener_count(&EventKind::Connected), 0);
        manager.dispatch(&ClientEvent::Connected(Connected));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_explicit_release_only_removes_its_own_listener() {
        let manager = CallbackManager::new();
        let (first_count, first) = counter();
        let (second_count, second) = counter();

        let first_subscription = manager.subscribe::<Connected, _>(first);
        let _second_subscription = manager.subscribe::<Connected, _>(second);
        first_subscription.release();

        assert_eq!(manager.listener_count(&EventKind::Connected), 1);
        manager.dispatch(&ClientEvent::Connected(Connected));
        assert_eq!(first_count.load(Ordering::SeqCst), 0);
        assert_eq!(second_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscription_outliving_manager_is_harmless() {
        let manager = CallbackManager::new();
        let (_, handler) = counter();
        let subscription = manager.subscribe::<Connected, _>(handler);

        drop(manager);
        subscription.release();
    }
}
