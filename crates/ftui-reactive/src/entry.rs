#![forbid(unsafe_code)]

//! A single registered callback inside an observable's subscriber table.
//!
//! # Owner liveness
//!
//! An entry may be tied to an *owner*: any `Arc`-managed object. The entry
//! keeps only a `Weak` to it, so the owner is never kept alive by its own
//! subscriptions. Once the owner's last strong handle is gone the entry
//! reports itself invalid and is pruned on the next update.
//!
//! While a callback runs, the owner is upgraded and held for the duration
//! of that single call.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

/// Boxed subscriber callback.
pub(crate) type Callback<T> = Box<dyn FnMut(&T) + Send + 'static>;

/// Type-erased, non-owning handle to a subscription owner.
pub(crate) type OwnerRef = Weak<dyn Any + Send + Sync>;

/// Downgrade an owner into a type-erased weak reference.
pub(crate) fn owner_ref<O: Any + Send + Sync>(owner: &Arc<O>) -> OwnerRef {
    let erased: Arc<dyn Any + Send + Sync> = Arc::clone(owner) as Arc<dyn Any + Send + Sync>;
    Arc::downgrade(&erased)
}

/// Callback + optional weak owner + liveness flag.
pub(crate) struct SubscriptionEntry<T> {
    callback: Option<Callback<T>>,
    owner: Option<OwnerRef>,
    /// Per-core stamp that pairs this entry with exactly one token.
    generation: u64,
    live: bool,
}

impl<T> SubscriptionEntry<T> {
    pub(crate) fn new(callback: Callback<T>, owner: Option<OwnerRef>, generation: u64) -> Self {
        Self {
            callback: Some(callback),
            owner,
            generation,
            live: true,
        }
    }

    #[inline]
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// True if the entry was not invalidated and its owner (if any) is alive.
    pub(crate) fn valid(&self) -> bool {
        self.live
            && self.callback.is_some()
            && self.owner.as_ref().is_none_or(|owner| owner.strong_count() > 0)
    }

    /// Invoke the callback if the entry is still valid.
    ///
    /// Returns `false` when the entry is dead and should be pruned.
    pub(crate) fn deliver(&mut self, value: &T) -> bool {
        if !self.live {
            return false;
        }
        let _owner = match &self.owner {
            Some(owner) => match owner.upgrade() {
                Some(strong) => Some(strong),
                None => return false,
            },
            None => None,
        };
        match self.callback.as_mut() {
            Some(callback) => {
                callback(value);
                true
            }
            None => false,
        }
    }

    /// Drop the callback and the owner reference; the entry stays dead.
    pub(crate) fn invalidate(&mut self) {
        self.live = false;
        self.callback = None;
        self.owner = None;
    }
}

impl<T> fmt::Debug for SubscriptionEntry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionEntry")
            .field("generation", &self.generation)
            .field("owned", &self.owner.is_some())
            .field("valid", &self.valid())
            .finish()
    }
}
