//! Reactive Primitives
//!
//! This module implements the core reactive system: signals, computeds, and
//! effects, plus batching and untracked reads.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! within a tracking context (such as a computed or effect), the read is
//! recorded as a dependency of that context. When the signal's value
//! changes, everything downstream is marked dirty.
//!
//! ## Computeds
//!
//! A Computed is a derived value that caches its result. It is lazy: it
//! re-evaluates only when read after one of its dependencies really changed,
//! and at most once per change.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change. Effects are used to synchronize reactive state with
//! external systems.
//!
//! # Propagation
//!
//! A write runs in two phases. The mark phase walks the dependents of the
//! signal, marks them dirty, and collects the effects it reaches. The settle
//! phase then runs each of those effects once, in creation order, but only
//! after pulling its dependencies up to date and seeing that one of them
//! changed. No computation ever observes a mix of old and new values.
//!
//! # Implementation Notes
//!
//! The reactive system uses a thread-local stack of evaluation frames to
//! detect dependencies automatically. When a signal or computed is read, it
//! is recorded in the innermost tracking frame, if any.

mod batch;
mod computed;
mod context;
mod effect;
mod runtime;
mod signal;

pub use batch::{batch, try_batch, untrack};
pub use computed::Computed;
pub use context::{Captured, ReactiveContext};
pub use effect::{on_cleanup, Effect};
pub use runtime::{EffectErrorHandler, Runtime};
pub use signal::Signal;

use crate::error::ReactiveError;
use crate::graph::{GraphSnapshot, NodeId};

/// Create a signal holding `value`.
pub fn create_signal<T: PartialEq + 'static>(value: T) -> Signal<T> {
    Signal::new(value)
}

/// Create a computed from `compute`. It is evaluated once immediately.
pub fn create_computed<T, F>(compute: F) -> Computed<T>
where
    T: PartialEq + 'static,
    F: Fn() -> T + 'static,
{
    Computed::new(compute)
}

/// Create an effect and run it once.
pub fn create_effect<F: Fn() + 'static>(run: F) -> Effect {
    Effect::new(run)
}

/// Install the handler that receives effect failures on this thread.
///
/// With a handler installed, a failing effect no longer surfaces as an error
/// from the write that triggered it.
pub fn on_effect_error<F>(handler: F)
where
    F: Fn(&ReactiveError, NodeId) + 'static,
{
    Runtime::set_effect_error_handler(handler);
}

/// Remove the effect error handler installed with [`on_effect_error`].
///
/// Effect failures are again returned from the write that triggered them.
pub fn clear_effect_error_handler() {
    Runtime::clear_effect_error_handler();
}

/// Capture this thread's dependency graph.
pub fn graph_snapshot() -> GraphSnapshot {
    Runtime::snapshot()
}
