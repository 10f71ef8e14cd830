//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects signals, computeds
//! and effects. It owns the dependency graph and turns writes into effect
//! runs.
//!
//! # How It Works
//!
//! 1. Signals, computeds and effects register a node on creation and
//!    unregister it when dropped or disposed.
//!
//! 2. Every successful evaluation commits the reads it captured as the
//!    node's new dependency set.
//!
//! 3. When a signal's value changes, the runtime:
//!    a. Bumps the signal's version
//!    b. Marks every transitive dependent dirty and collects reached effects
//!       into the pending set (mark phase)
//!    c. Unless a batch is open, settles: each pending effect, in
//!       registration order, refreshes its dependencies and runs only if one
//!       of them really changed (settle phase)
//!
//! Computeds are lazy. They recompute when pulled, at most once per epoch,
//! and a recompute that produces an equal value does not bump the version,
//! so nothing downstream re-runs.
//!
//! # Threading
//!
//! There is one runtime per thread. Reactive handles are `!Send`; a host
//! that wants to drive the graph from several threads must funnel every call
//! through one of them.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::rc::{Rc, Weak};

use crate::config::RuntimeConfig;
use crate::error::ReactiveError;
use crate::graph::{DependencyGraph, DirtyState, EdgeDiff, GraphSnapshot, Node, NodeId, NodeKind};

use super::context::Captured;
use super::effect::EffectInner;

/// A node the runtime can bring up to date on demand.
pub(crate) trait Reactive {
    fn node_id(&self) -> NodeId;

    /// Make the node's value current, recomputing if a dependency changed.
    fn update(&self) -> Result<(), ReactiveError>;
}

/// Callback receiving effect failures.
pub type EffectErrorHandler = Rc<dyn Fn(&ReactiveError, NodeId)>;

thread_local! {
    static RUNTIME: Runtime = Runtime::new();
}

/// The per-thread reactive runtime.
pub struct Runtime {
    graph: RefCell<DependencyGraph>,

    /// Computeds by id. Weak so the graph never keeps a computed alive.
    computeds: RefCell<HashMap<NodeId, Weak<dyn Reactive>>>,

    /// Live effects. Owned here until disposed.
    effects: RefCell<BTreeMap<NodeId, Rc<EffectInner>>>,

    /// Effects reached by the mark phase and not yet settled, ordered by
    /// id (registration order).
    pending: RefCell<BTreeSet<NodeId>>,

    batch_depth: Cell<usize>,
    settling: Cell<bool>,
    epoch: Cell<u64>,

    config: RefCell<RuntimeConfig>,
    error_handler: RefCell<Option<EffectErrorHandler>>,
}

/// Resets a flag when dropped, including during unwinding.
pub(crate) struct FlagGuard<'a>(pub(crate) &'a Cell<bool>);

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl Runtime {
    fn new() -> Self {
        Self {
            graph: RefCell::new(DependencyGraph::new()),
            computeds: RefCell::new(HashMap::new()),
            effects: RefCell::new(BTreeMap::new()),
            pending: RefCell::new(BTreeSet::new()),
            batch_depth: Cell::new(0),
            settling: Cell::new(false),
            epoch: Cell::new(0),
            config: RefCell::new(RuntimeConfig::default()),
            error_handler: RefCell::new(None),
        }
    }

    pub(crate) fn with<R>(f: impl FnOnce(&Runtime) -> R) -> R {
        RUNTIME.with(f)
    }

    /// Like [`Runtime::with`], but returns `None` once the thread's runtime
    /// has been torn down. Used from `Drop` impls.
    pub(crate) fn try_with<R>(f: impl FnOnce(&Runtime) -> R) -> Option<R> {
        RUNTIME.try_with(f).ok()
    }

    // ------------------------------------------------------------------
    // Public controls
    // ------------------------------------------------------------------

    /// Replace this thread's runtime configuration.
    pub fn configure(config: RuntimeConfig) {
        Self::with(|rt| *rt.config.borrow_mut() = config);
    }

    /// This thread's current configuration.
    pub fn config() -> RuntimeConfig {
        Self::with(|rt| rt.config.borrow().clone())
    }

    /// Route effect failures to `handler` instead of the triggering caller.
    pub fn set_effect_error_handler<F>(handler: F)
    where
        F: Fn(&ReactiveError, NodeId) + 'static,
    {
        Self::with(|rt| *rt.error_handler.borrow_mut() = Some(Rc::new(handler)));
    }

    /// Remove the effect error handler. Failures go back to the triggering
    /// caller.
    pub fn clear_effect_error_handler() {
        Self::with(|rt| *rt.error_handler.borrow_mut() = None);
    }

    /// Capture the dependency graph.
    pub fn snapshot() -> GraphSnapshot {
        Self::with(|rt| rt.graph.borrow().snapshot(rt.epoch.get()))
    }

    /// Number of live nodes.
    pub fn node_count() -> usize {
        Self::with(|rt| rt.graph.borrow().node_count())
    }

    /// Number of settle rounds run so far.
    pub fn epoch() -> u64 {
        Self::with(|rt| rt.epoch.get())
    }

    /// Check if a batch is open.
    pub fn is_batching() -> bool {
        Self::with(|rt| rt.batch_depth.get() > 0)
    }

    /// Number of effects waiting for the next settle phase.
    pub fn pending_effects() -> usize {
        Self::with(|rt| rt.pending.borrow().len())
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    pub(crate) fn register_source(&self, id: NodeId) {
        self.graph.borrow_mut().add_node(Node::with_id(id, NodeKind::Source));
    }

    pub(crate) fn register_computed(&self, id: NodeId, node: Weak<dyn Reactive>) {
        self.graph.borrow_mut().add_node(Node::with_id(id, NodeKind::Derived));
        self.computeds.borrow_mut().insert(id, node);
    }

    pub(crate) fn register_effect(&self, effect: Rc<EffectInner>) {
        let id = effect.node_id();
        self.graph.borrow_mut().add_node(Node::with_id(id, NodeKind::Sink));
        self.effects.borrow_mut().insert(id, effect);
    }

    /// Remove a signal or computed node and every edge touching it.
    pub(crate) fn unregister(&self, id: NodeId) {
        self.graph.borrow_mut().remove_node(id);
        self.computeds.borrow_mut().remove(&id);
        tracing::trace!(node = %id, "unregistered");
    }

    /// Detach an effect from the graph and drop it from any unsettled epoch.
    ///
    /// Returns the runtime's reference so the caller can drop it outside of
    /// any runtime borrow.
    pub(crate) fn dispose_effect(&self, id: NodeId) -> Option<Rc<EffectInner>> {
        let effect = self.effects.borrow_mut().remove(&id);
        self.pending.borrow_mut().remove(&id);
        self.graph.borrow_mut().remove_node(id);
        tracing::debug!(effect = %id, "disposed");
        effect
    }

    pub(crate) fn effect(&self, id: NodeId) -> Option<Rc<EffectInner>> {
        self.effects.borrow().get(&id).cloned()
    }

    // ------------------------------------------------------------------
    // Node state
    // ------------------------------------------------------------------

    pub(crate) fn version(&self, id: NodeId) -> u64 {
        self.graph.borrow().version(id).unwrap_or_default()
    }

    pub(crate) fn is_clean(&self, id: NodeId) -> bool {
        self.graph.borrow().state(id) == Some(DirtyState::Clean)
    }

    pub(crate) fn mark_clean(&self, id: NodeId) {
        if let Some(node) = self.graph.borrow_mut().get_node_mut(id) {
            node.mark_clean();
        }
    }

    pub(crate) fn dependent_count(&self, id: NodeId) -> usize {
        self.graph
            .borrow()
            .get_node(id)
            .map_or(0, |node| node.dependents().len())
    }

    pub(crate) fn dependency_count(&self, id: NodeId) -> usize {
        self.graph
            .borrow()
            .get_node(id)
            .map_or(0, |node| node.dependencies().len())
    }

    /// Commit a successful evaluation: replace the dependency set with the
    /// captured reads, bump the version if the value changed, mark clean.
    pub(crate) fn commit(&self, id: NodeId, captured: Captured, changed: bool) -> EdgeDiff {
        let mut graph = self.graph.borrow_mut();
        let diff = graph.replace_dependencies(id, captured);
        if let Some(node) = graph.get_node_mut(id) {
            if changed {
                node.bump_version();
            }
            node.mark_clean();
        }

        if !diff.is_empty() {
            tracing::trace!(node = %id, added = ?diff.added, removed = ?diff.removed, "dependencies replaced");
        }
        diff
    }

    /// Bring a computed up to date. Unknown ids are ignored.
    pub(crate) fn refresh(&self, id: NodeId) -> Result<(), ReactiveError> {
        let node = self.computeds.borrow().get(&id).and_then(Weak::upgrade);
        match node {
            Some(node) => node.update(),
            None => Ok(()),
        }
    }

    /// Check whether any dependency of `id` changed since `id` last read it.
    ///
    /// Dependencies are visited in read order and dirty computeds among them
    /// are refreshed first, so the answer reflects settled upstream values.
    /// Stops at the first change.
    pub(crate) fn dependencies_changed(&self, id: NodeId) -> Result<bool, ReactiveError> {
        let dependencies: Vec<(NodeId, u64)> = match self.graph.borrow().get_node(id) {
            Some(node) => node.dependencies().iter().map(|(dep, seen)| (*dep, *seen)).collect(),
            None => return Ok(true),
        };

        for (dep, seen) in dependencies {
            let kind = self.graph.borrow().kind(dep);
            match kind {
                Some(NodeKind::Derived) => self.refresh(dep)?,
                Some(_) => {}
                // A dependency that went away counts as a change
                None => return Ok(true),
            }

            if self.version(dep) != seen {
                return Ok(true);
            }
        }

        Ok(false)
    }

    // ------------------------------------------------------------------
    // Propagation
    // ------------------------------------------------------------------

    /// Record a change to source `id` and run the mark phase.
    ///
    /// Effects reached are added to the pending set; nothing runs.
    pub(crate) fn mark(&self, id: NodeId) -> usize {
        let sinks = {
            let mut graph = self.graph.borrow_mut();
            if let Some(node) = graph.get_node_mut(id) {
                node.bump_version();
            }
            graph.mark(id)
        };

        tracing::debug!(signal = %id, effects = sinks.len(), "marked");

        let count = sinks.len();
        self.pending.borrow_mut().extend(sinks);
        count
    }

    /// Put effect `id` back in the pending set if a dependency it just
    /// committed has already moved on.
    ///
    /// A run can write signals feeding nodes it read for the first time.
    /// The mark phase does not reach the effect through those edges because
    /// they are only created at commit, so the check happens here instead.
    pub(crate) fn reschedule_if_stale(&self, id: NodeId) -> bool {
        let stale = {
            let graph = self.graph.borrow();
            graph.get_node(id).is_some_and(|node| {
                node.dependencies().iter().any(|(dep, seen)| {
                    graph.version(*dep) != Some(*seen)
                        || (graph.kind(*dep) == Some(NodeKind::Derived)
                            && graph.state(*dep) == Some(DirtyState::Dirty))
                })
            })
        };

        if stale {
            tracing::debug!(effect = %id, "inputs moved during run, rescheduled");
            self.pending.borrow_mut().insert(id);
        }
        stale
    }

    /// Mark, then settle unless a batch is open.
    pub(crate) fn write(&self, id: NodeId) -> Result<(), ReactiveError> {
        self.mark(id);
        self.flush()
    }

    /// Settle if no batch is open.
    pub(crate) fn flush(&self) -> Result<(), ReactiveError> {
        if self.batch_depth.get() > 0 {
            return Ok(());
        }
        self.settle()
    }

    /// Settle phase: run every pending effect whose inputs changed.
    ///
    /// Each round drains the pending set and counts as one epoch. Effects
    /// that write signals while running schedule a further round of the
    /// same call. A nested call (a write from inside an effect) returns
    /// immediately and leaves the work to the running loop.
    ///
    /// Effect failures are isolated. With a handler installed they are
    /// reported there; otherwise they are logged and the first one is
    /// returned once every scheduled effect has run.
    pub(crate) fn settle(&self) -> Result<(), ReactiveError> {
        if self.settling.replace(true) {
            return Ok(());
        }
        let _settling = FlagGuard(&self.settling);

        let max_rounds = self.config.borrow().max_settle_rounds;
        let mut unhandled = None;
        let mut rounds = 0;

        loop {
            let scheduled = std::mem::take(&mut *self.pending.borrow_mut());
            if scheduled.is_empty() {
                break;
            }

            if rounds >= max_rounds {
                if let Some(err) = &unhandled {
                    tracing::error!(error = %err, "effect failure superseded by settle limit");
                }
                tracing::warn!(rounds, dropped = scheduled.len(), "settle phase did not converge");
                return Err(ReactiveError::SettleLimitExceeded { rounds });
            }
            rounds += 1;

            let epoch = self.epoch.get() + 1;
            self.epoch.set(epoch);
            let _span = tracing::debug_span!("settle", epoch, effects = scheduled.len()).entered();

            for id in scheduled {
                // Disposed since it was scheduled
                let Some(effect) = self.effect(id) else {
                    continue;
                };

                if let Err(err) = effect.run_isolated() {
                    if let Err(err) = self.report_effect_error(id, err) {
                        if unhandled.is_none() {
                            unhandled = Some(err);
                        }
                    }
                }
            }
        }

        match unhandled {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Hand an effect failure to the installed handler.
    ///
    /// Without a handler the error is logged and given back to the caller.
    pub(crate) fn report_effect_error(&self, id: NodeId, err: ReactiveError) -> Result<(), ReactiveError> {
        let handler = self.error_handler.borrow().clone();
        match handler {
            Some(handler) => {
                handler(&err, id);
                Ok(())
            }
            None => {
                tracing::error!(effect = %id, error = %err, "effect failed");
                Err(err)
            }
        }
    }

    // ------------------------------------------------------------------
    // Batching
    // ------------------------------------------------------------------

    pub(crate) fn begin_batch(&self) {
        self.batch_depth.set(self.batch_depth.get() + 1);
    }

    pub(crate) fn end_batch(&self) {
        self.batch_depth.set(self.batch_depth.get().saturating_sub(1));
    }
}
