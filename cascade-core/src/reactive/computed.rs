//! Computed Implementation
//!
//! A Computed is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Computeds Work
//!
//! 1. On creation, the computed runs its function once and caches the result.
//!
//! 2. When a dependency is written, the mark phase flags the computed dirty.
//!    Nothing is recomputed yet.
//!
//! 3. On the next read, a dirty computed first refreshes its own
//!    dependencies and compares their versions with the ones it saw last
//!    time. If none changed it is marked clean without running.
//!
//! 4. Otherwise it recomputes. If the new value equals the cached one the
//!    version stays put, so readers downstream see no change.
//!
//! # Why This Matters
//!
//! Because the value is memoized before it is returned, a computed reached
//! through several paths in one epoch runs once, and every reader sees the
//! settled value. That is what makes diamond-shaped graphs glitch-free.
//!
//! # Failure
//!
//! A compute function that fails leaves nothing cached: the computed stays
//! dirty, keeps its previous dependency set, and the error goes to the
//! reader. Reading a computed from inside its own evaluation is a cycle.

use std::cell::{Cell, RefCell};
use std::fmt::{self, Debug};
use std::rc::{Rc, Weak};

use crate::error::{BoxError, ReactiveError};
use crate::graph::{NodeId, NodeKind};

use super::context::ReactiveContext;
use super::runtime::{FlagGuard, Reactive, Runtime};

type ComputeFn<T> = Box<dyn Fn() -> Result<T, BoxError>>;
type Equality<T> = Box<dyn Fn(&T, &T) -> bool>;

struct ComputedInner<T> {
    id: NodeId,
    compute: ComputeFn<T>,
    equals: Equality<T>,

    /// The cached value (None if never successfully computed).
    value: RefCell<Option<T>>,

    /// Set while the computed is being brought up to date.
    refreshing: Cell<bool>,
}

impl<T> ComputedInner<T> {
    fn refresh(&self) -> Result<(), ReactiveError> {
        if self.refreshing.get() || ReactiveContext::is_evaluating(self.id) {
            tracing::debug!(node = %self.id, "cycle detected");
            return Err(ReactiveError::CycleDetected { node: self.id });
        }
        self.refreshing.set(true);
        let _refreshing = FlagGuard(&self.refreshing);

        if self.value.borrow().is_some() {
            if Runtime::with(|rt| rt.is_clean(self.id)) {
                return Ok(());
            }

            if !Runtime::with(|rt| rt.dependencies_changed(self.id))? {
                Runtime::with(|rt| rt.mark_clean(self.id));
                return Ok(());
            }
        }

        self.recompute()
    }

    fn recompute(&self) -> Result<(), ReactiveError> {
        tracing::debug!(node = %self.id, "recomputing");

        let ctx = ReactiveContext::enter(self.id, NodeKind::Derived);
        let result = (self.compute)();
        let captured = ctx.finish();

        // On failure the captured reads are discarded with `captured`
        let value = result.map_err(|err| ReactiveError::compute(self.id, err))?;

        let changed = match self.value.borrow().as_ref() {
            Some(old) => !(self.equals)(old, &value),
            None => true,
        };
        if changed {
            *self.value.borrow_mut() = Some(value);
        }

        Runtime::with(|rt| rt.commit(self.id, captured, changed));
        Ok(())
    }
}

impl<T> Reactive for ComputedInner<T> {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn update(&self) -> Result<(), ReactiveError> {
        self.refresh()
    }
}

impl<T> Drop for ComputedInner<T> {
    fn drop(&mut self) {
        Runtime::try_with(|rt| rt.unregister(self.id));
    }
}

/// A cached derived value that recomputes only when dependencies change.
///
/// # Example
///
/// ```rust
/// use cascade_core::reactive::{Computed, Signal};
///
/// let count = Signal::new(2);
/// let c = count.clone();
/// let doubled = Computed::new(move || c.get() * 2);
///
/// assert_eq!(doubled.get(), 4);
/// count.set(5);
/// assert_eq!(doubled.get(), 10);
/// ```
pub struct Computed<T> {
    inner: Rc<ComputedInner<T>>,
}

impl<T: PartialEq + 'static> Computed<T> {
    /// Create a computed that compares results with `PartialEq`.
    ///
    /// The function runs once immediately.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        Self::with_equality(compute, |a, b| a == b)
    }

    /// Create a computed whose function can fail.
    ///
    /// Errors are returned from [`Computed::try_get`]. A `ReactiveError`
    /// forwarded from an upstream `try_get` with `?` is passed through as is.
    pub fn new_fallible<F, E>(compute: F) -> Self
    where
        F: Fn() -> Result<T, E> + 'static,
        E: Into<BoxError>,
    {
        Self::from_parts(
            Box::new(move || -> Result<T, BoxError> { compute().map_err(Into::into) }),
            Box::new(|a: &T, b: &T| a == b),
        )
    }
}

impl<T: 'static> Computed<T> {
    /// Create a computed with a custom equality function.
    pub fn with_equality<F, Q>(compute: F, equals: Q) -> Self
    where
        F: Fn() -> T + 'static,
        Q: Fn(&T, &T) -> bool + 'static,
    {
        Self::from_parts(
            Box::new(move || -> Result<T, BoxError> { Ok(compute()) }),
            Box::new(equals),
        )
    }

    fn from_parts(compute: ComputeFn<T>, equals: Equality<T>) -> Self {
        let id = NodeId::new();
        let inner = Rc::new(ComputedInner {
            id,
            compute,
            equals,
            value: RefCell::new(None),
            refreshing: Cell::new(false),
        });

        let weak: Weak<dyn Reactive> = Rc::downgrade(&inner) as Weak<dyn Reactive>;
        Runtime::with(|rt| rt.register_computed(id, weak));

        // Evaluate eagerly. A failure leaves the computed dirty and is
        // reported again on the first read.
        if let Err(err) = inner.refresh() {
            tracing::debug!(node = %id, error = %err, "initial evaluation failed");
        }

        Self { inner }
    }

    /// Get the computed's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// # Panics
    ///
    /// Panics with the error [`Computed::try_get`] would return.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        match self.try_get() {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }

    /// Get the current value, recomputing if necessary.
    pub fn try_get(&self) -> Result<T, ReactiveError>
    where
        T: Clone,
    {
        self.try_with(T::clone)
    }

    /// Borrow the current value, recomputing if necessary.
    pub fn try_with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, ReactiveError> {
        self.inner.refresh()?;

        if ReactiveContext::is_tracking() {
            let version = Runtime::with(|rt| rt.version(self.id()));
            ReactiveContext::track(self.id(), version);
        }

        let value = self.inner.value.borrow();
        let value = value
            .as_ref()
            .expect("refreshed computed should have a value");
        Ok(f(value))
    }

    /// Borrow the current value.
    ///
    /// # Panics
    ///
    /// Panics with the error [`Computed::try_with`] would return.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        match self.try_with(f) {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }

    /// Get the current value without tracking the read.
    pub fn peek(&self) -> T
    where
        T: Clone,
    {
        let _untracked = ReactiveContext::untracked();
        self.get()
    }

    /// Check whether the next read will have to look at dependencies.
    pub fn is_dirty(&self) -> bool {
        self.inner.value.borrow().is_none() || !Runtime::with(|rt| rt.is_clean(self.id()))
    }

    /// Check if the computed has a cached value.
    pub fn has_value(&self) -> bool {
        self.inner.value.borrow().is_some()
    }

    /// Number of nodes this computed read during its last evaluation.
    pub fn dependency_count(&self) -> usize {
        Runtime::with(|rt| rt.dependency_count(self.id()))
    }
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Debug + 'static> Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.id())
            .field("value", &*self.inner.value.borrow())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
