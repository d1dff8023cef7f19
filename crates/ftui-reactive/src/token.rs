#![forbid(unsafe_code)]

//! Subscription handles: [`ObserverToken`] and the RAII [`Subscription`].
//!
//! A token identifies one subscription on exactly one observable. Its
//! [`id`](ObserverToken::id) is unique among the subscriptions registered on
//! that observable at the moment of insertion; ids are reused once freed.
//! Each token also carries a private generation stamp, so a stale token can
//! never cancel a later subscription that happens to reuse its id.
//!
//! Tokens keep only a weak back-reference to their observable; holding a
//! token does not keep the observable alive.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use crate::observable::{Observable, SharedCore};

/// Opaque handle for cancelling a subscription.
pub struct ObserverToken<T> {
    id: u64,
    generation: u64,
    core: Weak<SharedCore<T>>,
}

impl<T> ObserverToken<T> {
    pub(crate) fn new(id: u64, generation: u64, core: Weak<SharedCore<T>>) -> Self {
        Self {
            id,
            generation,
            core,
        }
    }

    /// Numeric identity of this subscription within its observable.
    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether this token was issued by the observable behind `core`.
    pub(crate) fn belongs_to(&self, core: &Arc<SharedCore<T>>) -> bool {
        std::ptr::eq(self.core.as_ptr(), Arc::as_ptr(core))
    }

    /// Whether this token was issued by `observable`.
    #[must_use]
    pub fn is_from(&self, observable: &Observable<T>) -> bool {
        self.belongs_to(observable.shared())
    }

    /// Cancel the subscription on the observable that issued this token.
    ///
    /// No-op if the observable is gone or the subscription was already
    /// removed. Must not be called from a callback running on that same
    /// observable (see the crate-level re-entrancy note).
    pub fn unsubscribe(&self) {
        if let Some(core) = self.core.upgrade() {
            Observable::from_shared(core).unsubscribe(self);
        }
    }

    /// Turn the token into a guard that unsubscribes on drop.
    #[must_use]
    pub fn into_guard(self) -> Subscription
    where
        T: Send + 'static,
    {
        Subscription {
            id: self.id,
            token: Some(Box::new(self)),
        }
    }
}

impl<T> Clone for ObserverToken<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            generation: self.generation,
            core: Weak::clone(&self.core),
        }
    }
}

impl<T> PartialEq for ObserverToken<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.generation == other.generation
            && Weak::ptr_eq(&self.core, &other.core)
    }
}

impl<T> Eq for ObserverToken<T> {}

impl<T> Hash for ObserverToken<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.generation.hash(state);
        self.core.as_ptr().cast::<()>().hash(state);
    }
}

impl<T> fmt::Debug for ObserverToken<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverToken")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .field("attached", &(self.core.strong_count() > 0))
            .finish()
    }
}

/// Type-erased cancellation, so [`Subscription`] is not generic over `T`.
trait Cancel: Send + Sync {
    fn cancel(&self);
}

impl<T: Send + 'static> Cancel for ObserverToken<T> {
    fn cancel(&self) {
        self.unsubscribe();
    }
}

/// RAII guard for a subscription.
///
/// Dropping the guard unsubscribes the callback. Use [`detach`](Self::detach)
/// to keep the subscription alive for the lifetime of the observable.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    token: Option<Box<dyn Cancel>>,
}

impl Subscription {
    /// Identity of the underlying token.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Unsubscribe now. Same as dropping the guard.
    pub fn cancel(mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
        }
    }

    /// Release the guard without unsubscribing.
    pub fn detach(mut self) {
        self.token = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("armed", &self.token.is_some())
            .finish()
    }
}
