//! Batching and Untracked Reads
//!
//! A batch groups several writes into one settle phase. Writes inside the
//! batch still mark eagerly, so reads observe new values at once, but no
//! effect runs until the outermost batch closes. Batches nest.

use crate::error::ReactiveError;

use super::context::ReactiveContext;
use super::runtime::Runtime;

struct BatchGuard;

impl BatchGuard {
    fn open() -> Self {
        Runtime::with(|rt| rt.begin_batch());
        BatchGuard
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        Runtime::try_with(|rt| rt.end_batch());
    }
}

/// Run `f` with effect scheduling deferred until it returns.
///
/// # Panics
///
/// Panics if an effect fails while settling and no effect error handler is
/// installed. See [`try_batch`].
///
/// # Example
///
/// ```rust
/// use cascade_core::reactive::{batch, Effect, Signal};
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let first = Signal::new(1);
/// let second = Signal::new(2);
/// let runs = Rc::new(Cell::new(0));
///
/// let (a, b, r) = (first.clone(), second.clone(), runs.clone());
/// let _effect = Effect::new(move || {
///     a.get();
///     b.get();
///     r.set(r.get() + 1);
/// });
///
/// batch(|| {
///     first.set(10);
///     second.set(20);
/// });
///
/// assert_eq!(runs.get(), 2);
/// ```
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    match try_batch(f) {
        Ok(value) => value,
        Err(err) => panic!("{err}"),
    }
}

/// Like [`batch`], but returns effect failures from the closing settle phase.
///
/// If `f` panics the batch is still closed, but nothing settles; effects
/// scheduled inside it wait for the next write.
pub fn try_batch<R>(f: impl FnOnce() -> R) -> Result<R, ReactiveError> {
    let value = {
        let _batch = BatchGuard::open();
        f()
    };

    Runtime::with(|rt| rt.flush())?;
    Ok(value)
}

/// Run `f` without recording any reads as dependencies.
///
/// Writes inside `f` are treated as if they were made by the surrounding
/// context, so a compute function still cannot write through `untrack`.
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    let _untracked = ReactiveContext::untracked();
    f()
}
