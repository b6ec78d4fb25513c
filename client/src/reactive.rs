//! Observer subscriptions for host-driven reactive values.
//!
//! The host environment owns reactivity: it decides when a value changed and
//! calls the registered listeners. This module only defines the contract
//! ([`Observable`]) and the handle that ends a subscription ([`Subscription`]),
//! plus [`ReactiveVar`], a small in-process implementation.
//!
//! # Example
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use astronomer_client::reactive::{Observable, ReactiveVar};
//!
//! let var = ReactiveVar::new(1);
//! let seen = Arc::new(Mutex::new(Vec::new()));
//!
//! let sink = Arc::clone(&seen);
//! let subscription = var.subscribe(Arc::new(move |v: &i32| sink.lock().unwrap().push(*v)));
//!
//! var.set(2);
//! var.set(2); // unchanged, no notification
//! drop(subscription);
//! var.set(3); // unsubscribed
//!
//! assert_eq!(*seen.lock().unwrap(), vec![2]);
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::trace;

/// Callback invoked with the new value on every change.
pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A value the host can observe for changes.
pub trait Observable<T>: Send + Sync {
    /// Returns the current value.
    fn get(&self) -> T;

    /// Registers `on_change`; it stays registered until the returned
    /// [`Subscription`] is dropped or unsubscribed.
    fn subscribe(&self, on_change: Listener<T>) -> Subscription;
}

/// Handle to a registered hook or listener.
///
/// Dropping the handle unsubscribes. Use [`Subscription::detach`] to keep the
/// registration alive for the rest of the process.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Creates a subscription that runs `cancel` when it ends.
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription with nothing to cancel.
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    /// Ends the subscription now.
    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    /// Leaves the registration in place for the lifetime of the host.
    pub fn detach(mut self) {
        self.cancel = None;
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

struct State<T> {
    value: T,
    listeners: Vec<(u64, Listener<T>)>,
    next_id: u64,
}

/// An in-process observable value.
///
/// Listeners run synchronously inside [`set`](Self::set), after the lock is
/// released, so a listener may read the variable again.
pub struct ReactiveVar<T> {
    state: Arc<Mutex<State<T>>>,
}

impl<T> ReactiveVar<T>
where
    T: Clone + PartialEq + Send + 'static,
{
    pub fn new(value: T) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                value,
                listeners: Vec::new(),
                next_id: 0,
            })),
        }
    }

    /// Replaces the value, notifying listeners if it changed.
    pub fn set(&self, value: T) {
        let listeners: Vec<Listener<T>> = {
            let mut state = lock(&self.state);
            if state.value == value {
                return;
            }
            state.value = value.clone();
            state.listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
        };

        trace!(listeners = listeners.len(), "Reactive value changed");
        for listener in listeners {
            listener(&value);
        }
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        lock(&self.state).listeners.len()
    }
}

impl<T> Observable<T> for ReactiveVar<T>
where
    T: Clone + PartialEq + Send + 'static,
{
    fn get(&self) -> T {
        lock(&self.state).value.clone()
    }

    fn subscribe(&self, on_change: Listener<T>) -> Subscription {
        let id = {
            let mut state = lock(&self.state);
            let id = state.next_id;
            state.next_id += 1;
            state.listeners.push((id, on_change));
            id
        };

        let weak: Weak<Mutex<State<T>>> = Arc::downgrade(&self.state);
        Subscription::new(move || {
            if let Some(state) = weak.upgrade() {
                lock(&state).listeners.retain(|(other, _)| *other != id);
            }
        })
    }
}

fn lock<T>(state: &Mutex<State<T>>) -> MutexGuard<'_, State<T>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
