#![forbid(unsafe_code)]

//! Derived observables: [`map`](Observable::map),
//! [`try_map`](Observable::try_map), [`flat_map`](Observable::flat_map) and
//! [`filter`](Observable::filter).
//!
//! Each combinator creates a new observable with the source's options and
//! subscribes a forwarding callback to the source. The source's subscriber
//! table owns the derived observable, so derived cells live at least as long
//! as their source. Forwarding locks the derived cell from inside the
//! source's callback; lock order always runs source to derived.

use crate::observable::Observable;

impl<T: Send + 'static> Observable<T> {
    /// Derive an observable whose values are `transform` applied to every
    /// value of `self`, in the same order.
    ///
    /// A panic in `transform` propagates out of the source's `update`.
    #[must_use]
    pub fn map<U, F>(&self, mut transform: F) -> Observable<U>
    where
        U: Send + 'static,
        F: FnMut(&T) -> U + Send + 'static,
    {
        let derived = Observable::with_options(None, self.options());
        let sink = derived.clone();
        self.subscribe(move |value| sink.update(transform(value)));
        derived
    }

    /// Like [`map`](Self::map), but the transform may fail.
    ///
    /// Both outcomes are published as data; an `Err` never interrupts the
    /// source's update.
    #[must_use]
    pub fn try_map<U, E, F>(&self, mut transform: F) -> Observable<Result<U, E>>
    where
        U: Send + 'static,
        E: Send + 'static,
        F: FnMut(&T) -> Result<U, E> + Send + 'static,
    {
        let derived = Observable::with_options(None, self.options());
        let sink = derived.clone();
        self.subscribe(move |value| sink.update(transform(value)));
        derived
    }

    /// For every value of `self`, subscribe to the observable returned by
    /// `transform` and forward all of its values.
    ///
    /// Earlier inner observables stay subscribed when a new one arrives, so
    /// emissions from all of them interleave into the result. `transform`
    /// must not return `self` or any observable `self` is derived from:
    /// subscribing to it would lock a cell that is already locked further up
    /// the current update and deadlock.
    #[must_use]
    pub fn flat_map<U, F>(&self, mut transform: F) -> Observable<U>
    where
        U: Clone + Send + 'static,
        F: FnMut(&T) -> Observable<U> + Send + 'static,
    {
        let derived = Observable::with_options(None, self.options());
        let sink = derived.clone();
        self.subscribe(move |value| {
            let forward = sink.clone();
            transform(value).subscribe(move |inner: &U| forward.update(inner.clone()));
        });
        derived
    }
}

impl<T: Clone + Send + 'static> Observable<T> {
    /// Derive an observable that forwards only values matching `predicate`.
    #[must_use]
    pub fn filter<P>(&self, mut predicate: P) -> Observable<T>
    where
        P: FnMut(&T) -> bool + Send + 'static,
    {
        let derived = Observable::with_options(None, self.options());
        let sink = derived.clone();
        self.subscribe(move |value| {
            if predicate(value) {
                sink.update(value.clone());
            }
        });
        derived
    }
}
