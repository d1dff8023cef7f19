#![forbid(unsafe_code)]

//! Construction-time behaviour flags for [`Observable`](crate::Observable).

use bitflags::bitflags;

bitflags! {
    /// Behaviour flags fixed when an observable is created.
    ///
    /// The flags are independent; combining them is allowed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ObservingOptions: u8 {
        /// Never store the pushed value.
        ///
        /// `value()` always reads `None` and new subscribers are never
        /// replayed the last value. Such observables cannot be passed to
        /// [`merge_all`](crate::merge_all).
        const NO_INITIAL_VALUE = 1 << 0;
        /// Deliver at most one update.
        ///
        /// After the first `update` every subscriber is invalidated and the
        /// table is cleared. Later subscriptions are not registered.
        const ONCE = 1 << 1;
    }
}

impl ObservingOptions {
    /// Whether the observable keeps (and replays) its last value.
    #[inline]
    #[must_use]
    pub const fn retains_value(self) -> bool {
        !self.contains(Self::NO_INITIAL_VALUE)
    }

    /// Whether the observable fires at most once.
    #[inline]
    #[must_use]
    pub const fn is_once(self) -> bool {
        self.contains(Self::ONCE)
    }
}
