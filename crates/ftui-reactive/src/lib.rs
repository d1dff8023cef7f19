#![forbid(unsafe_code)]

//! Thread-safe reactive values for FrankenTUI.
//!
//! This crate provides a shared value cell that notifies subscribers on every
//! update, plus combinators for building derived values:
//!
//! - [`Observable`]: an `Arc<Mutex<..>>` cell holding an optional value and a
//!   subscriber table.
//! - [`ObservingOptions`]: construction-time flags (`NO_INITIAL_VALUE`,
//!   `ONCE`).
//! - [`ObserverToken`]: handle for cancelling one subscription;
//!   [`Subscription`]: RAII guard that cancels on drop.
//! - Combinators: [`Observable::map`], [`Observable::try_map`],
//!   [`Observable::flat_map`], [`Observable::filter`],
//!   [`Observable::merge`] and [`merge_all`].
//!
//! # Example
//!
//! ```
//! use ftui_reactive::{Observable, ObservingOptions, merge_all};
//!
//! let greeting = Observable::new("Hello".to_string());
//! let subject = Observable::new("World".to_string());
//! let both = merge_all(&[greeting.clone(), subject], ObservingOptions::empty());
//! assert_eq!(both.value(), Some(vec!["Hello".to_string(), "World".to_string()]));
//!
//! greeting.update("Hi".to_string());
//! assert_eq!(both.value(), Some(vec!["Hi".to_string(), "World".to_string()]));
//! ```
//!
//! # Invariants
//!
//! 1. `update` delivers synchronously: every subscriber registered before the
//!    call has seen the value when it returns.
//! 2. A subscriber never sees a value pushed before it subscribed, except the
//!    stored value replayed at subscribe time.
//! 3. Subscriptions never keep their owner alive, and combinator graphs hold
//!    no strong reference cycles.
//! 4. `unsubscribe` is idempotent.
//!
//! # Re-entrancy
//!
//! Callbacks run while the observable's lock is held. A callback must not
//! call `subscribe`, `update`, `unsubscribe` or `value` on the observable it
//! is subscribed to; doing so deadlocks. This is a caller obligation and is
//! not detected. Touching *other* observables from a callback is fine.
//!
//! # Feature flags
//!
//! - `tracing`: emit `tracing` events for subscribe, unsubscribe, pruning and
//!   `ONCE` firing.

mod combinators;
mod entry;
pub mod merge;
pub mod observable;
pub mod options;
pub mod token;

pub use merge::{MergeError, merge_all, try_merge_all};
pub use observable::{Observable, WeakObservable};
pub use options::ObservingOptions;
pub use token::{ObserverToken, Subscription};
