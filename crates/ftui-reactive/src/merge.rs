#![forbid(unsafe_code)]

//! Combining observables: pairwise [`merge`](Observable::merge) and list
//! [`merge_all`].
//!
//! # Design
//!
//! Each merge keeps a small latest-value table of its own; an input's
//! callback records its value there and, once every slot is filled,
//! publishes to the result while still holding the table. Lock order is
//! `input -> merge table -> result`, so two inputs updated concurrently from
//! different threads cannot deadlock each other. The one sibling read is a
//! pairwise merge reading a spent `ONCE` side, whose cell never calls back
//! into the merge.
//!
//! # Failure Modes
//!
//! - [`merge_all`] panics when an input was built with
//!   [`ObservingOptions::NO_INITIAL_VALUE`]; use [`try_merge_all`] to get a
//!   [`MergeError`] instead.

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::observable::{Observable, WeakObservable, lock_recover};
use crate::options::ObservingOptions;

/// Errors from [`try_merge_all`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeError {
    /// The input at `index` does not retain values and can never be read.
    NoInitialValue { index: usize },
}

impl fmt::Display for MergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoInitialValue { index } => write!(
                f,
                "merge input {index} was built with NO_INITIAL_VALUE and cannot be merged"
            ),
        }
    }
}

impl std::error::Error for MergeError {}

/// Latest values seen by a pairwise merge.
struct PairSlots<T, U> {
    left: Option<T>,
    right: Option<U>,
}

/// Where a pairwise merge reads one side's current value from.
///
/// A `ONCE` side stops delivering after its single update (or is never
/// registered when it already holds a value), so once its slot is filled
/// the slot goes stale. From then on the side is read directly; a spent
/// `ONCE` observable never calls back into the merge, so this cannot
/// deadlock against the slots lock.
struct SideReader<V> {
    once: Option<WeakObservable<V>>,
}

impl<V: Clone> SideReader<V> {
    fn new<W>(side: &Observable<V>, firing: &Observable<W>) -> Self {
        // Merging a cell with itself: both slots are filled by the same
        // update, and reading the cell from its own callback would deadlock.
        let same_cell = std::ptr::eq(
            Arc::as_ptr(side.shared()).cast::<()>(),
            Arc::as_ptr(firing.shared()).cast::<()>(),
        );
        let once = (side.options().is_once() && !same_cell).then(|| side.downgrade());
        Self { once }
    }

    fn current(&self, slot: &Option<V>) -> Option<V> {
        match (&self.once, slot) {
            (Some(side), Some(stale)) => side
                .upgrade()
                .and_then(|side| side.value())
                .or_else(|| Some(stale.clone())),
            (_, slot) => slot.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Observable<T> {
    /// Combine with `other` into an observable of pairs.
    ///
    /// Whenever either side updates and the other side currently holds a
    /// value, `(self_value, other_value)` is emitted. Nothing is emitted
    /// until both sides have a value. A side built with `NO_INITIAL_VALUE`
    /// never "currently holds" a value, so only its own updates can fire the
    /// pair. A `ONCE` side keeps contributing its latest stored value after
    /// it has stopped notifying.
    #[must_use]
    pub fn merge<U>(&self, other: &Observable<U>) -> Observable<(T, U)>
    where
        U: Clone + Send + 'static,
    {
        let result = Observable::empty();
        let slots = Arc::new(Mutex::new(PairSlots::<T, U> {
            left: None,
            right: None,
        }));

        let left_retains = self.options().retains_value();
        let right_retains = other.options().retains_value();
        let left_reader = SideReader::new(self, other);
        let right_reader = SideReader::new(other, self);

        {
            let slots = Arc::clone(&slots);
            let sink = result.clone();
            self.subscribe(move |left: &T| {
                let mut slots = lock_recover(&slots);
                if left_retains {
                    slots.left = Some(left.clone());
                }
                if let Some(right) = right_reader.current(&slots.right) {
                    sink.update((left.clone(), right));
                }
            });
        }
        {
            let sink = result.clone();
            other.subscribe(move |right: &U| {
                let mut slots = lock_recover(&slots);
                if right_retains {
                    slots.right = Some(right.clone());
                }
                if let Some(left) = left_reader.current(&slots.left) {
                    sink.update((left, right.clone()));
                }
            });
        }
        result
    }
}

/// Combine a list of observables into an observable of value vectors.
///
/// The result emits only after every input has produced a value; after that,
/// any input update re-emits the full vector (in input order) with the latest
/// values of the others. An empty `sources` list yields a result that never
/// emits.
///
/// # Panics
///
/// Panics if any input was built with [`ObservingOptions::NO_INITIAL_VALUE`].
#[must_use]
pub fn merge_all<U>(sources: &[Observable<U>], options: ObservingOptions) -> Observable<Vec<U>>
where
    U: Clone + Send + 'static,
{
    match try_merge_all(sources, options) {
        Ok(merged) => merged,
        Err(err) => panic!("{err}"),
    }
}

/// Fallible form of [`merge_all`].
///
/// # Errors
///
/// Returns [`MergeError::NoInitialValue`] for the first input that does not
/// retain values. No subscriptions are made in that case.
pub fn try_merge_all<U>(
    sources: &[Observable<U>],
    options: ObservingOptions,
) -> Result<Observable<Vec<U>>, MergeError>
where
    U: Clone + Send + 'static,
{
    if let Some(index) = sources
        .iter()
        .position(|source| !source.options().retains_value())
    {
        return Err(MergeError::NoInitialValue { index });
    }

    let result = Observable::with_options(None, options);
    let latest: Arc<Mutex<Vec<Option<U>>>> = Arc::new(Mutex::new(vec![None; sources.len()]));

    // Shadow copies decouple the merge from the caller's handles.
    let shadows: Vec<Observable<U>> = sources.iter().map(|source| source.map(U::clone)).collect();

    for (index, shadow) in shadows.iter().enumerate() {
        let latest = Arc::clone(&latest);
        let sink = result.clone();
        shadow.subscribe(move |value: &U| {
            let mut slots = lock_recover(&latest);
            if let Some(slot) = slots.get_mut(index) {
                *slot = Some(value.clone());
            }
            if let Some(values) = slots.iter().cloned().collect::<Option<Vec<U>>>() {
                sink.update(values);
            }
        });
    }
    Ok(result)
}
