//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and is
//! a source node in the dependency graph.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a reactive context (computed/effect), the
//!    read is recorded as a dependency of that context.
//!
//! 2. When a signal is written with a value its equality function considers
//!    different, its version is bumped and the runtime marks everything
//!    downstream dirty.
//!
//! 3. Unless a batch is open, the runtime then settles: affected effects
//!    re-run once each.
//!
//! Writing an equal value is a no-op.

use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::rc::Rc;

use crate::error::ReactiveError;
use crate::graph::NodeId;

use super::context::ReactiveContext;
use super::runtime::Runtime;

type Equality<T> = Box<dyn Fn(&T, &T) -> bool>;

struct SignalInner<T> {
    id: NodeId,
    value: RefCell<T>,
    equals: Equality<T>,
}

impl<T> Drop for SignalInner<T> {
    fn drop(&mut self) {
        Runtime::try_with(|rt| rt.unregister(self.id));
    }
}

/// A reactive signal holding a value of type T.
///
/// Cloning a signal yields another handle to the same value.
///
/// # Example
///
/// ```rust
/// use cascade_core::reactive::Signal;
///
/// let count = Signal::new(0);
/// assert_eq!(count.get(), 0);
///
/// // Update the value (settles dependents)
/// count.set(5);
/// assert_eq!(count.get(), 5);
/// ```
pub struct Signal<T> {
    inner: Rc<SignalInner<T>>,
}

impl<T: PartialEq + 'static> Signal<T> {
    /// Create a new signal that compares values with `PartialEq`.
    pub fn new(value: T) -> Self {
        Self::with_equality(value, |a, b| a == b)
    }
}

impl<T: 'static> Signal<T> {
    /// Create a new signal with a custom equality function.
    ///
    /// A write for which `equals(new, current)` holds is ignored. Pass
    /// `|_, _| false` to treat every write as a change.
    pub fn with_equality<F>(value: T, equals: F) -> Self
    where
        F: Fn(&T, &T) -> bool + 'static,
    {
        let id = NodeId::new();
        Runtime::with(|rt| rt.register_source(id));

        Self {
            inner: Rc::new(SignalInner {
                id,
                value: RefCell::new(value),
                equals: Box::new(equals),
            }),
        }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Get the current value.
    ///
    /// If called within a reactive context, this also records the read as a
    /// dependency of the running computation.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.with(T::clone)
    }

    /// Borrow the current value, tracking the read.
    ///
    /// The signal must not be written from inside `f`.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track();
        f(&self.inner.value.borrow())
    }

    /// Get the current value without tracking the read.
    pub fn peek(&self) -> T
    where
        T: Clone,
    {
        self.inner.value.borrow().clone()
    }

    /// Set a new value.
    ///
    /// # Panics
    ///
    /// Panics if called from inside a compute function, or if an effect
    /// failed during the settle phase and no effect error handler is
    /// installed. See [`Signal::try_set`].
    pub fn set(&self, value: T) {
        if let Err(err) = self.try_set(value) {
            panic!("{err}");
        }
    }

    /// Set a new value, returning errors instead of panicking.
    ///
    /// Effects that failed while settling are reported after all of the
    /// epoch's effects have run.
    pub fn try_set(&self, value: T) -> Result<(), ReactiveError> {
        if let Some(computed) = ReactiveContext::computing() {
            return Err(ReactiveError::WriteDuringCompute {
                signal: self.id(),
                computed,
            });
        }

        if (self.inner.equals)(&self.inner.value.borrow(), &value) {
            return Ok(());
        }

        // Drop the old value before anything downstream runs
        drop(self.inner.value.replace(value));

        Runtime::with(|rt| rt.write(self.id()))
    }

    /// Update the value using a function of the current one.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let next = f(&self.inner.value.borrow());
        self.set(next);
    }

    /// Number of nodes currently reading this signal.
    pub fn dependent_count(&self) -> usize {
        Runtime::with(|rt| rt.dependent_count(self.id()))
    }

    fn track(&self) {
        if ReactiveContext::is_tracking() {
            let version = Runtime::with(|rt| rt.version(self.id()));
            ReactiveContext::track(self.id(), version);
        }
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Debug + 'static> Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id())
            .field("value", &*self.inner.value.borrow())
            .field("dependent_count", &self.dependent_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{untrack, Computed, Effect};
    use std::cell::Cell;

    #[test]
    fn signal_get_and_set() {
        let signal = Signal::new(0);
        assert_eq!(signal.get(), 0);

        signal.set(42);
        assert_eq!(signal.get(), 42);
    }

    #[test]
    fn signal_update() {
        let signal = Signal::new(10);
        signal.update(|v| v + 5);
        assert_eq!(signal.get(), 15);
    }

    #[test]
    fn signal_clone_shares_state() {
        let signal1 = Signal::new(0);
        let signal2 = signal1.clone();

        signal1.set(42);
        assert_eq!(signal2.get(), 42);

        signal2.set(100);
        assert_eq!(signal1.get(), 100);
        assert_eq!(signal1.id(), signal2.id());
    }

    #[test]
    fn signal_ids_are_unique() {
        let s1 = Signal::new(0);
        let s2 = Signal::new(0);
        let s3 = Signal::new(0);

        assert_ne!(s1.id(), s2.id());
        assert_ne!(s2.id(), s3.id());
        assert_ne!(s1.id(), s3.id());
    }

    #[test]
    fn equal_write_is_a_no_op() {
        let signal = Signal::new(7);
        let runs = Rc::new(Cell::new(0));

        let s = signal.clone();
        let r = runs.clone();
        let _effect = Effect::new(move || {
            s.get();
            r.set(r.get() + 1);
        });

        signal.set(7);
        assert_eq!(runs.get(), 1);

        signal.set(8);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn custom_equality() {
        // Case-insensitive strings
        let name = Signal::with_equality("Ada".to_string(), |a: &String, b: &String| {
            a.eq_ignore_ascii_case(b)
        });
        let runs = Rc::new(Cell::new(0));

        let n = name.clone();
        let r = runs.clone();
        let _effect = Effect::new(move || {
            n.with(|_| ());
            r.set(r.get() + 1);
        });

        name.set("ADA".to_string());
        assert_eq!(runs.get(), 1);
        assert_eq!(name.peek(), "Ada");

        name.set("Grace".to_string());
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn peek_does_not_track() {
        let signal = Signal::new(1);
        let s = signal.clone();
        let _derived = Computed::new(move || s.peek() * 2);

        assert_eq!(signal.dependent_count(), 0);

        let s = signal.clone();
        let _tracked = Computed::new(move || s.get() * 2);
        assert_eq!(signal.dependent_count(), 1);

        let s = signal.clone();
        let _untracked = Computed::new(move || untrack(|| s.get()));
        assert_eq!(signal.dependent_count(), 1);
    }

    #[test]
    fn write_inside_compute_is_rejected() {
        let target = Signal::new(0);
        let t = target.clone();
        let derived = Computed::new(move || {
            let err = t.try_set(1).unwrap_err();
            matches!(err, ReactiveError::WriteDuringCompute { .. })
        });

        assert!(derived.get());
        assert_eq!(target.get(), 0);
    }

    #[test]
    fn write_inside_untracked_compute_is_still_rejected() {
        let target = Signal::new(0);
        let t = target.clone();
        let derived = Computed::new(move || untrack(|| t.try_set(1).is_err()));

        assert!(derived.get());
    }

    #[test]
    fn debug_shows_value() {
        let signal = Signal::new(3);
        let debug = format!("{signal:?}");
        assert!(debug.contains("value: 3"));
    }
}
