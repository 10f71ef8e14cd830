//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies.
//!
//! 2. When a dependency is written, the mark phase puts the effect in the
//!    pending set, once, however many paths lead to it.
//!
//! 3. During the settle phase the effect refreshes its dependencies. If none
//!    of them really changed it stays put; otherwise it runs once, tracking
//!    a fresh dependency set.
//!
//! # Differences from Computed
//!
//! - Computeds return a value; effects do not.
//! - Computeds are lazy (compute on access); effects are eager (run when
//!   deps change).
//! - Effects are sinks: nothing can depend on them.
//!
//! # Cleanup
//!
//! An effect body can register callbacks with [`on_cleanup`]. They run
//! before the effect runs again and when it is disposed, which is where
//! listeners or timers set up by the previous run get torn down.
//!
//! # Failure
//!
//! A run that returns an error or panics is contained: the effect keeps its
//! previous dependency set, and the failure is reported through the
//! runtime's effect error handler (see `Runtime::set_effect_error_handler`).
//! A failing first run has no previous set, so it keeps the reads it made
//! and is retried on the next change.
//!
//! # Self-Writes
//!
//! An effect may write signals that feed nodes it reads for the first time
//! in the same run. The mark phase cannot reach it through edges that do not
//! exist yet, so after committing, the effect checks its fresh dependencies
//! and reschedules itself if any of them already moved.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use crate::error::{BoxError, ReactiveError};
use crate::graph::{NodeId, NodeKind};

use super::context::ReactiveContext;
use super::runtime::{Reactive, Runtime};

type EffectFn = Box<dyn Fn() -> Result<(), BoxError>>;
type Cleanup = Box<dyn FnOnce()>;

pub(crate) struct EffectInner {
    id: NodeId,
    run: EffectFn,
    disposed: Cell<bool>,
    run_count: Cell<usize>,
    cleanups: RefCell<Vec<Cleanup>>,
}

impl EffectInner {
    /// Run the effect if it has never run or an input changed.
    fn refresh(&self) -> Result<(), ReactiveError> {
        if self.disposed.get() {
            return Ok(());
        }

        if self.run_count.get() > 0 && !Runtime::with(|rt| rt.dependencies_changed(self.id))? {
            Runtime::with(|rt| rt.mark_clean(self.id));
            return Ok(());
        }

        self.execute()
    }

    fn execute(&self) -> Result<(), ReactiveError> {
        self.run_cleanups();
        let first_run = self.run_count.get() == 0;

        let ctx = ReactiveContext::enter(self.id, NodeKind::Sink);
        let result = match panic::catch_unwind(AssertUnwindSafe(|| (self.run)())) {
            Ok(result) => result.map_err(|err| ReactiveError::effect(self.id, err)),
            Err(payload) => Err(ReactiveError::panicked(self.id, payload)),
        };
        let captured = ctx.finish();

        self.run_count.set(self.run_count.get() + 1);
        tracing::debug!(effect = %self.id, run = self.run_count.get(), "effect ran");

        // Disposed from inside its own body: stay detached
        if self.disposed.get() {
            return result;
        }

        match result {
            Ok(()) => {
                Runtime::with(|rt| {
                    rt.commit(self.id, captured, false);
                    rt.reschedule_if_stale(self.id);
                });
                Ok(())
            }
            Err(err) => {
                // A failed first run still subscribes to what it read, so the
                // next change retries it
                if first_run {
                    Runtime::with(|rt| rt.commit(self.id, captured, false));
                }
                Err(err)
            }
        }
    }

    fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }

        let owned = Runtime::try_with(|rt| rt.dispose_effect(self.id));
        self.run_cleanups();
        drop(owned);
    }

    /// Bring the effect up to date, containing any panic to this effect.
    pub(crate) fn run_isolated(&self) -> Result<(), ReactiveError> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.refresh())) {
            Ok(result) => result,
            Err(payload) => Err(ReactiveError::panicked(self.id, payload)),
        }
    }

    fn add_cleanup(&self, cleanup: Cleanup) {
        self.cleanups.borrow_mut().push(cleanup);
    }

    fn run_cleanups(&self) {
        let cleanups = std::mem::take(&mut *self.cleanups.borrow_mut());
        for cleanup in cleanups {
            cleanup();
        }
    }
}

impl Reactive for EffectInner {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn update(&self) -> Result<(), ReactiveError> {
        self.refresh()
    }
}

/// A side-effecting computation that runs when dependencies change.
///
/// The runtime keeps the effect alive until [`Effect::dispose`] is called;
/// dropping the handle does not stop it.
///
/// # Example
///
/// ```rust
/// use cascade_core::reactive::{Effect, Signal};
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let count = Signal::new(0);
/// let seen = Rc::new(Cell::new(-1));
///
/// let (c, s) = (count.clone(), seen.clone());
/// let effect = Effect::new(move || s.set(c.get()));
/// assert_eq!(seen.get(), 0);
///
/// count.set(5);
/// assert_eq!(seen.get(), 5);
///
/// effect.dispose();
/// count.set(6);
/// assert_eq!(seen.get(), 5);
/// ```
#[derive(Clone)]
pub struct Effect {
    inner: Rc<EffectInner>,
}

impl Effect {
    /// Create a new effect with the given function.
    ///
    /// The function runs immediately to establish initial dependencies.
    ///
    /// # Panics
    ///
    /// Panics if that first run fails, or the settle phase it starts by
    /// writing its own inputs fails, and no effect error handler is
    /// installed. An effect whose first run fails this way is disposed.
    pub fn new<F>(run: F) -> Self
    where
        F: Fn() + 'static,
    {
        Self::from_fn(Box::new(move || -> Result<(), BoxError> {
            run();
            Ok(())
        }))
    }

    /// Create an effect whose function can fail.
    ///
    /// Failures go to the effect error handler, or to the caller whose write
    /// triggered the run.
    pub fn new_fallible<F, E>(run: F) -> Self
    where
        F: Fn() -> Result<(), E> + 'static,
        E: Into<BoxError>,
    {
        Self::from_fn(Box::new(move || -> Result<(), BoxError> { run().map_err(Into::into) }))
    }

    fn from_fn(run: EffectFn) -> Self {
        let inner = Rc::new(EffectInner {
            id: NodeId::new(),
            run,
            disposed: Cell::new(false),
            run_count: Cell::new(0),
            cleanups: RefCell::new(Vec::new()),
        });

        Runtime::with(|rt| rt.register_effect(Rc::clone(&inner)));

        if let Err(err) = inner.run_isolated() {
            if let Err(err) = Runtime::with(|rt| rt.report_effect_error(inner.id, err)) {
                // The caller never gets a handle to dispose it with
                inner.dispose();
                panic!("{err}");
            }
        }

        // Settle the first run if it wrote one of its own inputs
        if let Err(err) = Runtime::with(|rt| rt.flush()) {
            panic!("{err}");
        }

        Self { inner }
    }

    /// Get the effect's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Dispose of the effect.
    ///
    /// The effect is detached from every dependency and dropped from any
    /// epoch that has not settled yet, then its cleanups run. It never runs
    /// again. Disposing twice is a no-op.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// Check if the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.get()
    }

    /// Number of nodes read during the last successful run.
    pub fn dependency_count(&self) -> usize {
        Runtime::with(|rt| rt.dependency_count(self.inner.id))
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id())
            .field("run_count", &self.run_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Register `cleanup` on the effect that is currently running.
///
/// It runs before that effect's next run, or when the effect is disposed.
/// Outside of an effect body the callback is dropped without running.
pub fn on_cleanup<F>(cleanup: F)
where
    F: FnOnce() + 'static,
{
    let effect = match ReactiveContext::current_observer() {
        Some((id, NodeKind::Sink)) => Runtime::with(|rt| rt.effect(id)),
        _ => None,
    };

    match effect {
        Some(effect) => effect.add_cleanup(Box::new(cleanup)),
        None => tracing::warn!("on_cleanup called outside of an effect"),
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Computed, Signal};

    fn counter() -> (Rc<Cell<usize>>, Rc<Cell<usize>>) {
        let count = Rc::new(Cell::new(0));
        (count.clone(), count)
    }

    #[test]
    fn effect_runs_on_creation() {
        let (runs, runs_clone) = counter();

        let effect = Effect::new(move || runs_clone.set(runs_clone.get() + 1));

        assert_eq!(runs.get(), 1);
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn effect_reruns_when_dependency_changes() {
        let signal = Signal::new(0);
        let seen = Rc::new(Cell::new(-1));

        let (s, v) = (signal.clone(), seen.clone());
        let effect = Effect::new(move || v.set(s.get()));

        signal.set(42);
        assert_eq!(seen.get(), 42);
        assert_eq!(effect.run_count(), 2);
        assert_eq!(effect.dependency_count(), 1);
    }

    #[test]
    fn effect_does_not_run_after_disposal() {
        let signal = Signal::new(0);
        let (runs, runs_clone) = counter();

        let s = signal.clone();
        let effect = Effect::new(move || {
            s.get();
            runs_clone.set(runs_clone.get() + 1);
        });
        assert_eq!(runs.get(), 1);

        effect.dispose();
        assert!(effect.is_disposed());
        assert_eq!(signal.dependent_count(), 0);

        signal.set(1);
        signal.set(2);
        assert_eq!(runs.get(), 1);

        // Disposing again is harmless
        effect.dispose();
    }

    #[test]
    fn dropping_the_handle_keeps_the_effect_alive() {
        let signal = Signal::new(0);
        let (runs, runs_clone) = counter();

        let s = signal.clone();
        drop(Effect::new(move || {
            s.get();
            runs_clone.set(runs_clone.get() + 1);
        }));

        signal.set(1);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn effect_clone_shares_state() {
        let effect1 = Effect::new(|| {});
        let effect2 = effect1.clone();

        assert_eq!(effect1.id(), effect2.id());
        assert_eq!(effect2.run_count(), 1);

        effect1.dispose();
        assert!(effect2.is_disposed());
    }

    #[test]
    fn cleanup_runs_before_rerun_and_on_dispose() {
        let signal = Signal::new(0);
        let log = Rc::new(RefCell::new(Vec::new()));

        let (s, l) = (signal.clone(), log.clone());
        let effect = Effect::new(move || {
            let value = s.get();
            l.borrow_mut().push(format!("run {value}"));
            let l = l.clone();
            on_cleanup(move || l.borrow_mut().push(format!("cleanup {value}")));
        });

        signal.set(1);
        effect.dispose();

        assert_eq!(
            *log.borrow(),
            vec!["run 0", "cleanup 0", "run 1", "cleanup 1"]
        );
    }

    #[test]
    fn on_cleanup_outside_effect_is_ignored() {
        let (calls, calls_clone) = counter();
        on_cleanup(move || calls_clone.set(calls_clone.get() + 1));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn effect_reading_unchanged_computed_is_not_rerun() {
        let signal = Signal::new(1);
        let s = signal.clone();
        let positive = Computed::new(move || s.get() > 0);

        let (runs, runs_clone) = counter();
        let p = positive.clone();
        let _effect = Effect::new(move || {
            p.get();
            runs_clone.set(runs_clone.get() + 1);
        });

        signal.set(2);
        signal.set(3);
        assert_eq!(runs.get(), 1);

        signal.set(-1);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn dispose_from_inside_body_stops_future_runs() {
        let signal = Signal::new(0);
        let slot: Rc<RefCell<Option<Effect>>> = Rc::new(RefCell::new(None));
        let (runs, runs_clone) = counter();

        let (s, me) = (signal.clone(), slot.clone());
        let effect = Effect::new(move || {
            runs_clone.set(runs_clone.get() + 1);
            if s.get() > 0 {
                if let Some(me) = me.borrow().as_ref() {
                    me.dispose();
                }
            }
        });
        *slot.borrow_mut() = Some(effect.clone());

        signal.set(1);
        assert!(effect.is_disposed());
        assert_eq!(signal.dependent_count(), 0);

        signal.set(2);
        assert_eq!(runs.get(), 2);

        // Break the handle cycle
        slot.borrow_mut().take();
    }
    #[test]
    fn first_run_writing_its_input_reruns() {
        let source = Signal::new(15);
        let s = source.clone();
        let doubled = Computed::new(move || s.get() * 2);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let (d, s, v) = (doubled.clone(), source.clone(), seen.clone());
        let effect = Effect::new(move || {
            v.borrow_mut().push(d.get());
            s.set(10);
        });

        assert_eq!(*seen.borrow(), vec![30, 20]);
        assert_eq!(effect.run_count(), 2);
        assert_eq!(doubled.get(), 20);
    }

    #[test]
    fn settle_run_writing_a_new_input_reruns() {
        let enabled = Signal::new(false);
        let source = Signal::new(15);
        let s = source.clone();
        let doubled = Computed::new(move || s.get() * 2);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let (e, d, s, v) = (enabled.clone(), doubled.clone(), source.clone(), seen.clone());
        let effect = Effect::new(move || {
            if e.get() {
                v.borrow_mut().push(d.get());
                s.set(10);
            }
        });

        enabled.set(true);

        assert_eq!(*seen.borrow(), vec![30, 20]);
        assert_eq!(effect.run_count(), 3);
        assert_eq!(effect.dependency_count(), 2);
    }

    #[test]
    fn failed_first_run_is_retried_on_change() {
        Runtime::set_effect_error_handler(|_, _| {});

        let signal = Signal::new(0);
        let s = signal.clone();
        let effect = Effect::new_fallible(move || -> Result<(), String> {
            if s.get() == 0 {
                return Err("not ready".to_string());
            }
            Ok(())
        });
        assert_eq!(effect.run_count(), 1);
        assert_eq!(effect.dependency_count(), 1);

        signal.set(1);
        signal.set(2);
        assert_eq!(effect.run_count(), 3);

        Runtime::clear_effect_error_handler();
    }

    #[test]
    fn panicking_first_run_is_unregistered() {
        let signal = Signal::new(0);
        let before = Runtime::node_count();
        let captured = Rc::new(());

        let (s, c) = (signal.clone(), captured.clone());
        let result = panic::catch_unwind(AssertUnwindSafe(move || {
            Effect::new(move || {
                let _held = &c;
                s.get();
                panic!("first run");
            })
        }));

        assert!(result.is_err());
        assert_eq!(Runtime::node_count(), before);
        assert_eq!(signal.dependent_count(), 0);
        assert_eq!(Rc::strong_count(&captured), 1);
        assert_eq!(Runtime::pending_effects(), 0);
    }
}
