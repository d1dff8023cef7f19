#![forbid(unsafe_code)]

//! Thread-safe observable value cell with token-based subscriptions.
//!
//! # Design
//!
//! [`Observable<T>`] wraps an optional value and a subscriber table in shared
//! storage (`Arc<Mutex<..>>`). Every [`update`](Observable::update) stores the
//! value (unless [`ObservingOptions::NO_INITIAL_VALUE`] is set) and delivers it
//! to every live subscriber, in id order, before returning.
//!
//! The lock is held for the whole of `subscribe`, `update` and `unsubscribe`,
//! including while user callbacks run. This is what makes each `update` a
//! consistent snapshot: no subscriber sees a value concurrently with another
//! thread mutating the table, and a subscriber registered during an `update`
//! on another thread never sees that update.
//!
//! # Performance
//!
//! | Operation       | Complexity                     |
//! |-----------------|--------------------------------|
//! | `value()`       | O(1) + clone                   |
//! | `update()`      | O(S) where S = subscribers     |
//! | `subscribe()`   | O(log S)                       |
//! | `unsubscribe()` | O(log S)                       |
//!
//! # Failure Modes
//!
//! - **Re-entrant access**: calling `subscribe`, `update`, `unsubscribe` or
//!   `value` on an observable from inside one of *its own* callbacks
//!   deadlocks. Callbacks may freely touch *other* observables, which is all
//!   the combinators ever do.
//! - **Panicking callback**: the panic unwinds out of `update`/`subscribe`.
//!   Subscribers after the panicking one miss that update. The lock is
//!   released on unwind and poisoning is ignored on the next acquisition.
//! - **Dead owners**: entries whose owner was dropped stay in the table until
//!   the next `update` prunes them.

use std::collections::BTreeMap;
use std::fmt;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

#[cfg(feature = "tracing")]
use tracing::{debug, trace};

use crate::entry::{Callback, OwnerRef, SubscriptionEntry, owner_ref};
use crate::options::ObservingOptions;
use crate::token::{ObserverToken, Subscription};

/// Lock a mutex, ignoring poison.
///
/// Subscriber tables are only mutated between callback invocations, so a
/// panic inside a callback leaves them consistent.
pub(crate) fn lock_recover<S>(mutex: &Mutex<S>) -> MutexGuard<'_, S> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared interior for [`Observable<T>`].
pub(crate) struct ObservableInner<T> {
    value: Option<T>,
    subscribers: BTreeMap<u64, SubscriptionEntry<T>>,
    options: ObservingOptions,
    /// Set after the first update of a `ONCE` observable.
    fired: bool,
    next_generation: u64,
}

pub(crate) type SharedCore<T> = Mutex<ObservableInner<T>>;

/// A shared, thread-safe value cell with change notification.
///
/// Cloning an `Observable` creates a new handle to the **same** cell; both
/// handles see the same value and share subscribers.
///
/// # Invariants
///
/// 1. Subscriber ids are unique among the currently registered entries.
/// 2. A subscriber registered before `update(v)` observes `v` exactly once,
///    before `update` returns.
/// 3. With `NO_INITIAL_VALUE`, `value()` is always `None`.
/// 4. With `ONCE`, the table is empty after the first update and stays empty.
pub struct Observable<T> {
    inner: Arc<SharedCore<T>>,
}

// Manual Clone: shares the same Arc.
impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = lock_recover(&self.inner);
        f.debug_struct("Observable")
            .field("value", &inner.value)
            .field("options", &inner.options)
            .field("subscriber_count", &inner.subscribers.len())
            .finish()
    }
}

impl<T> Default for Observable<T> {
    fn default() -> Self {
        Self::with_options(None, ObservingOptions::empty())
    }
}

impl<T> Observable<T> {
    /// Create an observable holding `value`.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self::with_options(Some(value), ObservingOptions::empty())
    }

    /// Create an observable with no value yet.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create an observable with explicit options.
    ///
    /// With `NO_INITIAL_VALUE` the initial value is discarded.
    #[must_use]
    pub fn with_options(value: Option<T>, options: ObservingOptions) -> Self {
        let value = if options.retains_value() { value } else { None };
        Self {
            inner: Arc::new(Mutex::new(ObservableInner {
                value,
                subscribers: BTreeMap::new(),
                options,
                fired: false,
                next_generation: 0,
            })),
        }
    }

    pub(crate) fn from_shared(inner: Arc<SharedCore<T>>) -> Self {
        Self { inner }
    }

    pub(crate) fn shared(&self) -> &Arc<SharedCore<T>> {
        &self.inner
    }

    fn lock(&self) -> MutexGuard<'_, ObservableInner<T>> {
        lock_recover(&self.inner)
    }

    /// Options this observable was built with.
    #[must_use]
    pub fn options(&self) -> ObservingOptions {
        self.lock().options
    }

    /// Whether a value is currently stored.
    #[must_use]
    pub fn has_value(&self) -> bool {
        self.lock().value.is_some()
    }

    /// Access the current value by reference without cloning.
    pub fn with_value<R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        f(self.lock().value.as_ref())
    }

    /// Number of registered subscribers, including dead-owner entries not
    /// yet pruned.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Whether both handles refer to the same cell.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Create a non-owning handle to this observable.
    #[must_use]
    pub fn downgrade(&self) -> WeakObservable<T> {
        WeakObservable {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Cancel the subscription identified by `token`.
    ///
    /// Idempotent: unknown, foreign, expired or already-removed tokens are
    /// ignored.
    pub fn unsubscribe(&self, token: &ObserverToken<T>) {
        if !token.belongs_to(&self.inner) {
            return;
        }
        let removed = {
            let mut inner = self.lock();
            let matches = inner
                .subscribers
                .get(&token.id())
                .is_some_and(|entry| entry.generation() == token.generation());
            if matches {
                inner.subscribers.remove(&token.id())
            } else {
                None
            }
        };
        // Captured state is released outside the lock.
        if let Some(mut entry) = removed {
            entry.invalidate();
            #[cfg(feature = "tracing")]
            trace!(id = token.id(), "observable: unsubscribed");
        }
    }
}

impl<T: Clone> Observable<T> {
    /// Get a clone of the current value, if any.
    #[must_use]
    pub fn value(&self) -> Option<T> {
        self.lock().value.clone()
    }
}

impl<T: Send + 'static> Observable<T> {
    /// Register `handler` for every future update.
    ///
    /// If a value is present (and `NO_INITIAL_VALUE` is not set) the handler
    /// is called with it synchronously before this returns. On a `ONCE`
    /// observable that already holds a value or already fired, the handler
    /// only gets that immediate call and is not registered.
    pub fn subscribe<F>(&self, handler: F) -> ObserverToken<T>
    where
        F: FnMut(&T) + Send + 'static,
    {
        self.register(None, Box::new(handler))
    }

    /// Like [`subscribe`](Self::subscribe), but the subscription lives only
    /// as long as `owner`.
    ///
    /// Only a weak reference to `owner` is kept. Once the owner is dropped
    /// the handler is no longer called and the entry is pruned on the next
    /// update.
    pub fn subscribe_owned<O, F>(&self, owner: &Arc<O>, handler: F) -> ObserverToken<T>
    where
        O: Send + Sync + 'static,
        F: FnMut(&T) + Send + 'static,
    {
        self.register(Some(owner_ref(owner)), Box::new(handler))
    }

    /// Like [`subscribe`](Self::subscribe), returning a guard that
    /// unsubscribes on drop.
    pub fn subscribe_guarded<F>(&self, handler: F) -> Subscription
    where
        F: FnMut(&T) + Send + 'static,
    {
        self.subscribe(handler).into_guard()
    }

    fn register(&self, owner: Option<OwnerRef>, mut callback: Callback<T>) -> ObserverToken<T> {
        let mut guard = self.lock();
        let inner = &mut *guard;

        let id = inner
            .subscribers
            .last_key_value()
            .map_or(0, |(last, _)| last + 1);
        let generation = inner.next_generation;
        inner.next_generation += 1;
        let token = ObserverToken::new(id, generation, Arc::downgrade(&self.inner));

        if inner.options.is_once() && (inner.value.is_some() || inner.fired) {
            if let Some(value) = inner.value.as_ref() {
                callback(value);
            }
            #[cfg(feature = "tracing")]
            trace!(id, "observable: once already satisfied, not registering");
            return token;
        }

        let entry = inner
            .subscribers
            .entry(id)
            .or_insert(SubscriptionEntry::new(callback, owner, generation));
        if let Some(value) = inner.value.as_ref() {
            entry.deliver(value);
        }

        #[cfg(feature = "tracing")]
        trace!(id, subscribers = inner.subscribers.len(), "observable: subscribed");
        token
    }

    /// Push a new value and notify every live subscriber.
    ///
    /// Dead-owner entries are pruned. On a `ONCE` observable every entry is
    /// dropped afterwards; the stored value is kept.
    pub fn update(&self, value: T) {
        let released = {
            let mut guard = self.lock();
            let inner = &mut *guard;

            let mut transient = None;
            let current: &T = if inner.options.retains_value() {
                inner.value.insert(value)
            } else {
                transient.insert(value)
            };

            if inner.options.is_once() {
                // Detached before delivery so a panicking callback cannot
                // leave the table armed for a second update.
                inner.fired = true;
                let mut drained = mem::take(&mut inner.subscribers);
                #[cfg(feature = "tracing")]
                debug!(dropped = drained.len(), "observable: once fired");
                for entry in drained.values_mut() {
                    entry.deliver(current);
                }
                drained.into_values().collect::<Vec<_>>()
            } else {
                let mut dead = Vec::new();
                for (id, entry) in inner.subscribers.iter_mut() {
                    if !entry.deliver(current) {
                        dead.push(*id);
                    }
                }

                let pruned: Vec<SubscriptionEntry<T>> = dead
                    .iter()
                    .filter_map(|id| inner.subscribers.remove(id))
                    .collect();
                #[cfg(feature = "tracing")]
                {
                    if !pruned.is_empty() {
                        trace!(pruned = pruned.len(), "observable: pruned dead subscribers");
                    }
                }
                pruned
            }
        };

        for mut entry in released {
            entry.invalidate();
        }
    }
}

/// Non-owning handle to an [`Observable`].
pub struct WeakObservable<T> {
    inner: Weak<SharedCore<T>>,
}

impl<T> WeakObservable<T> {
    /// Get a strong handle if the observable is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Observable<T>> {
        self.inner.upgrade().map(Observable::from_shared)
    }
}

impl<T> Clone for WeakObservable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for WeakObservable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakObservable")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recorder<T: Clone + Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl FnMut(&T) + Send + 'static)
    {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        (log, move |v: &T| sink.lock().unwrap().push(v.clone()))
    }

    #[test]
    fn value_basic() {
        let obs = Observable::new(42);
        assert_eq!(obs.value(), Some(42));

        obs.update(99);
        assert_eq!(obs.value(), Some(99));
    }

    #[test]
    fn empty_has_no_value() {
        let obs: Observable<i32> = Observable::empty();
        assert_eq!(obs.value(), None);
        assert!(!obs.has_value());
    }

    #[test]
    fn subscribe_replays_current_value() {
        let obs = Observable::new(7);
        let (log, handler) = recorder::<i32>();
        let _token = obs.subscribe(handler);
        assert_eq!(*log.lock().unwrap(), vec![7]);
    }

    #[test]
    fn subscribe_on_empty_does_not_fire() {
        let obs: Observable<i32> = Observable::empty();
        let (log, handler) = recorder::<i32>();
        let _token = obs.subscribe(handler);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn every_update_is_delivered_in_order() {
        let obs = Observable::empty();
        let (log, handler) = recorder::<i32>();
        let _token = obs.subscribe(handler);
        for i in 0..5 {
            obs.update(i);
        }
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn equal_values_are_still_delivered() {
        let obs = Observable::new(1);
        let (log, handler) = recorder::<i32>();
        let _token = obs.subscribe(handler);
        obs.update(1);
        obs.update(1);
        assert_eq!(*log.lock().unwrap(), vec![1, 1, 1]);
    }

    #[test]
    fn no_initial_value_never_stores() {
        let obs = Observable::with_options(Some(5), ObservingOptions::NO_INITIAL_VALUE);
        assert_eq!(obs.value(), None);

        let (log, handler) = recorder::<i32>();
        let _token = obs.subscribe(handler);
        assert!(log.lock().unwrap().is_empty());

        obs.update(1);
        obs.update(2);
        assert_eq!(obs.value(), None);
        assert_eq!(*log.lock().unwrap(), vec![1, 2]);

        let (late, handler) = recorder::<i32>();
        let _late = obs.subscribe(handler);
        assert!(late.lock().unwrap().is_empty());
    }

    #[test]
    fn once_fires_a_single_update() {
        let obs = Observable::with_options(None, ObservingOptions::ONCE);
        let (log, handler) = recorder::<i32>();
        let _token = obs.subscribe(handler);
        assert_eq!(obs.subscriber_count(), 1);

        obs.update(1);
        assert_eq!(obs.subscriber_count(), 0);
        obs.update(2);
        assert_eq!(*log.lock().unwrap(), vec![1]);
        // Value is still retained.
        assert_eq!(obs.value(), Some(2));
    }

    #[test]
    fn once_late_subscriber_gets_replay_only() {
        let obs = Observable::with_options(None, ObservingOptions::ONCE);
        obs.update(10);

        let (log, handler) = recorder::<i32>();
        let _token = obs.subscribe(handler);
        assert_eq!(obs.subscriber_count(), 0);
        obs.update(11);
        assert_eq!(*log.lock().unwrap(), vec![10]);
    }

    #[test]
    fn once_with_initial_value_does_not_register() {
        let obs = Observable::with_options(Some(3), ObservingOptions::ONCE);
        let (log, handler) = recorder::<i32>();
        let _token = obs.subscribe(handler);
        assert_eq!(obs.subscriber_count(), 0);
        obs.update(4);
        assert_eq!(*log.lock().unwrap(), vec![3]);
    }

    #[test]
    fn once_without_value_retention_rejects_after_fire() {
        let obs = Observable::with_options(
            None,
            ObservingOptions::ONCE | ObservingOptions::NO_INITIAL_VALUE,
        );
        let (first, handler) = recorder::<i32>();
        let _a = obs.subscribe(handler);
        obs.update(1);

        let (second, handler) = recorder::<i32>();
        let _b = obs.subscribe(handler);
        obs.update(2);

        assert_eq!(*first.lock().unwrap(), vec![1]);
        assert!(second.lock().unwrap().is_empty());
        assert_eq!(obs.subscriber_count(), 0);
    }

    #[test]
    fn unsubscribe_stops_delivery_and_is_idempotent() {
        let obs = Observable::empty();
        let (log, handler) = recorder::<i32>();
        let token = obs.subscribe(handler);

        obs.update(1);
        obs.unsubscribe(&token);
        obs.unsubscribe(&token);
        token.unsubscribe();
        obs.update(2);

        assert_eq!(*log.lock().unwrap(), vec![1]);
        assert_eq!(obs.subscriber_count(), 0);
    }

    #[test]
    fn owner_death_prunes_lazily() {
        let obs = Observable::empty();
        let owner = Arc::new(String::from("view"));
        let (log, handler) = recorder::<i32>();
        let _token = obs.subscribe_owned(&owner, handler);

        obs.update(1);
        drop(owner);
        assert_eq!(obs.subscriber_count(), 1);

        obs.update(2);
        assert_eq!(obs.subscriber_count(), 0);
        assert_eq!(*log.lock().unwrap(), vec![1]);
    }

    #[test]
    fn owner_is_not_retained_by_subscription() {
        let obs = Observable::new(0);
        let owner = Arc::new(0u64);
        let _token = obs.subscribe_owned(&owner, |_| {});
        assert_eq!(Arc::strong_count(&owner), 1);
        assert_eq!(Arc::weak_count(&owner), 1);
    }

    #[test]
    fn unsubscribe_releases_captured_state() {
        let obs = Observable::new(0);
        let captured = Arc::new(());
        let held = Arc::clone(&captured);
        let token = obs.subscribe(move |_| {
            let _ = &held;
        });
        assert_eq!(Arc::strong_count(&captured), 2);
        obs.unsubscribe(&token);
        assert_eq!(Arc::strong_count(&captured), 1);
    }

    #[test]
    fn notification_order_is_id_order() {
        let obs = Observable::empty();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut tokens = Vec::new();
        for tag in ['A', 'B', 'C'] {
            let log = Arc::clone(&log);
            tokens.push(obs.subscribe(move |_: &i32| log.lock().unwrap().push(tag)));
        }
        obs.update(1);
        assert_eq!(*log.lock().unwrap(), vec!['A', 'B', 'C']);
    }

    #[test]
    fn clone_shares_state_and_subscribers() {
        let obs1 = Observable::new(0);
        let obs2 = obs1.clone();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let _token = obs1.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        obs2.update(42);
        assert_eq!(obs1.value(), Some(42));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(obs1.ptr_eq(&obs2));
    }

    #[test]
    fn panicking_subscriber_does_not_poison_the_cell() {
        let obs = Observable::empty();
        let _bad = obs.subscribe(|v: &i32| {
            if *v == 1 {
                panic!("boom");
            }
        });
        let (log, handler) = recorder::<i32>();
        let _good = obs.subscribe(handler);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| obs.update(1)));
        assert!(result.is_err());
        // The later subscriber missed the failed update.
        assert!(log.lock().unwrap().is_empty());

        obs.update(2);
        assert_eq!(*log.lock().unwrap(), vec![2]);
        assert_eq!(obs.value(), Some(2));
    }

    #[test]
    fn once_stays_spent_after_panicking_subscriber() {
        let obs = Observable::with_options(None, ObservingOptions::ONCE);
        let (log, handler) = recorder::<i32>();
        let _first = obs.subscribe(handler);
        let _bad = obs.subscribe(|v: &i32| {
            if *v == 1 {
                panic!("boom");
            }
        });

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| obs.update(1)));
        assert!(result.is_err());
        assert_eq!(obs.subscriber_count(), 0);

        obs.update(2);
        assert_eq!(*log.lock().unwrap(), vec![1]);

        let (late, handler) = recorder::<i32>();
        let _late = obs.subscribe(handler);
        obs.update(3);
        assert_eq!(*late.lock().unwrap(), vec![2]);
        assert_eq!(obs.subscriber_count(), 0);
    }

    #[test]
    fn weak_handle_upgrades_while_alive() {
        let obs = Observable::new(1);
        let weak = obs.downgrade();
        assert_eq!(weak.upgrade().and_then(|o| o.value()), Some(1));
        drop(obs);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn with_value_borrows() {
        let obs = Observable::new(vec![1, 2, 3]);
        let sum = obs.with_value(|v| v.map_or(0, |v| v.iter().sum::<i32>()));
        assert_eq!(sum, 6);
    }

    #[test]
    fn debug_format() {
        let obs = Observable::new(42);
        let dbg = format!("{obs:?}");
        assert!(dbg.contains("Observable"));
        assert!(dbg.contains("42"));
        assert!(dbg.contains("subscriber_count"));
    }
}
