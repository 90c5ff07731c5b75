//! Connectivity observer.
//!
//! Turns the runtime's reachability signal into an explicit boolean state that
//! callers can read synchronously ([`ConnectivityObserver::current_state`]),
//! subscribe to with a callback ([`ConnectivityObserver::subscribe`]), or await
//! as a [`tokio::sync::watch`] channel ([`ConnectivityObserver::watch`]).
//!
//! The observer starts online. A runtime that cannot report connectivity never
//! calls [`ConnectivityObserver::set_online`], so delivery is always attempted
//! and the remote call itself reports the real network condition.

pub mod probe;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::watch;

/// Callback invoked with the current state on subscription and on every transition.
pub type Listener = Arc<dyn Fn(bool) + Send + Sync>;

struct Registry {
    online: bool,
    next_id: u64,
    listeners: BTreeMap<u64, Listener>,
}

/// Shared online/offline state. Clones observe the same state.
#[derive(Clone)]
pub struct ConnectivityObserver {
    registry: Arc<Mutex<Registry>>,
    // Held while listeners run, so a subscriber's initial call and transition
    // calls are never delivered out of order.
    dispatch: Arc<Mutex<()>>,
    state: Arc<watch::Sender<bool>>,
}

impl Default for ConnectivityObserver {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ConnectivityObserver {
    pub fn new(online: bool) -> Self {
        let (state, _) = watch::channel(online);
        Self {
            registry: Arc::new(Mutex::new(Registry {
                online,
                next_id: 0,
                listeners: BTreeMap::new(),
            })),
            dispatch: Arc::new(Mutex::new(())),
            state: Arc::new(state),
        }
    }

    /// Last known state.
    pub fn current_state(&self) -> bool {
        *self.state.borrow()
    }

    /// Register `listener`. It is called once right away with the current
    /// state, then on every transition until the returned [`Subscription`] is
    /// unsubscribed or dropped.
    ///
    /// Listeners run on the caller's thread and must not call `subscribe` or
    /// `set_online` themselves.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(listener);
        let _dispatch = lock(&self.dispatch);

        let (id, online) = {
            let mut registry = lock(&self.registry);
            let id = registry.next_id;
            registry.next_id += 1;
            registry.listeners.insert(id, Arc::clone(&listener));
            (id, registry.online)
        };

        listener(online);

        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// A watch receiver that always holds the latest state.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }

    /// Feed a new reading from the signal source. Listeners are only notified
    /// on an actual transition. Returns whether the state changed.
    pub fn set_online(&self, online: bool) -> bool {
        let _dispatch = lock(&self.dispatch);

        let listeners: Vec<Listener> = {
            let mut registry = lock(&self.registry);
            if registry.online == online {
                return false;
            }
            registry.online = online;
            self.state.send_replace(online);
            registry.listeners.values().cloned().collect()
        };

        if online {
            tracing::info!(listeners = listeners.len(), "connectivity restored");
        } else {
            tracing::warn!(listeners = listeners.len(), "connectivity lost");
        }

        for listener in listeners {
            listener(online);
        }
        true
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        lock(&self.registry).listeners.len()
    }
}

/// Handle returned by [`ConnectivityObserver::subscribe`]. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).listeners.remove(&self.id);
        }
    }
}

// The observer cannot fail; a panicking listener must not wedge it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<bool>>>, impl Fn(bool) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |online| sink.lock().unwrap().push(online))
    }

    #[test]
    fn defaults_to_online() {
        let observer = ConnectivityObserver::default();
        assert!(observer.current_state());
    }

    #[test]
    fn subscribe_delivers_initial_state() {
        let observer = ConnectivityObserver::new(false);
        let (seen, listener) = recorder();
        let _sub = observer.subscribe(listener);
        assert_eq!(*seen.lock().unwrap(), vec![false]);
    }

    #[test]
    fn only_transitions_notify() {
        let observer = ConnectivityObserver::new(false);
        let (seen, listener) = recorder();
        let _sub = observer.subscribe(listener);

        assert!(!observer.set_online(false));
        assert!(observer.set_online(true));
        assert!(!observer.set_online(true));
        assert!(observer.set_online(false));

        assert_eq!(*seen.lock().unwrap(), vec![false, true, false]);
        assert!(!observer.current_state());
    }

    #[test]
    fn unsubscribe_leaves_other_listeners() {
        let observer = ConnectivityObserver::new(true);
        let (first_seen, first) = recorder();
        let (second_seen, second) = recorder();

        let first_sub = observer.subscribe(first);
        let _second_sub = observer.subscribe(second);
        assert_eq!(observer.subscriber_count(), 2);

        first_sub.unsubscribe();
        assert_eq!(observer.subscriber_count(), 1);

        observer.set_online(false);

        assert_eq!(*first_seen.lock().unwrap(), vec![true]);
        assert_eq!(*second_seen.lock().unwrap(), vec![true, false]);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let observer = ConnectivityObserver::new(true);
        let (seen, listener) = recorder();
        drop(observer.subscribe(listener));

        observer.set_online(false);
        assert_eq!(*seen.lock().unwrap(), vec![true]);
        assert_eq!(observer.subscriber_count(), 0);
    }

    #[test]
    fn clones_share_state() {
        let observer = ConnectivityObserver::new(true);
        let clone = observer.clone();
        clone.set_online(false);
        assert!(!observer.current_state());
    }

    #[tokio::test]
    async fn watch_sees_transitions() {
        let observer = ConnectivityObserver::new(false);
        let mut rx = observer.watch();
        assert!(!*rx.borrow());

        observer.set_online(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }
}
