//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a signal or computed is
//! read, the read is recorded against the innermost running computation.
//!
//! # Implementation
//!
//! We use a thread-local stack of frames. Entering a computation pushes a
//! tracked frame; [`ReactiveContext::finish`] pops it and hands back the
//! reads it captured. [`untrack`](super::untrack) pushes an untracked frame
//! that swallows reads. A guard pops its frame on drop, so the stack stays
//! balanced when a computation panics.
//!
//! Nested contexts (a computed reading another computed) attribute reads
//! to the innermost tracked frame only.

use std::cell::RefCell;

use smallvec::SmallVec;

use crate::graph::{NodeId, NodeKind};

/// Reads captured by one evaluation: `(node, version observed)`, in read order.
pub type Captured = SmallVec<[(NodeId, u64); 8]>;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

#[derive(Debug)]
enum Frame {
    Tracked {
        node: NodeId,
        kind: NodeKind,
        dependencies: Captured,
    },
    Untracked,
}

/// Guard for one frame of the reactive context stack.
///
/// The frame is popped when the guard is finished or dropped.
#[derive(Debug)]
pub struct ReactiveContext {
    node: Option<NodeId>,
    finished: bool,
}

impl ReactiveContext {
    /// Enter a tracked context for `node`.
    ///
    /// While this context is innermost, every tracked read is recorded as a
    /// dependency of `node`.
    pub fn enter(node: NodeId, kind: NodeKind) -> Self {
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().push(Frame::Tracked {
                node,
                kind,
                dependencies: Captured::new(),
            });
        });

        Self {
            node: Some(node),
            finished: false,
        }
    }

    /// Enter an untracked context. Reads inside it record nothing.
    pub fn untracked() -> Self {
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(Frame::Untracked));

        Self {
            node: None,
            finished: false,
        }
    }

    /// Leave the context and return the reads it captured.
    pub fn finish(mut self) -> Captured {
        self.finished = true;
        match self.pop() {
            Some(Frame::Tracked { dependencies, .. }) => dependencies,
            _ => Captured::new(),
        }
    }

    fn pop(&self) -> Option<Frame> {
        let popped = CONTEXT_STACK.with(|stack| stack.borrow_mut().pop());

        // Catch mismatched guards early
        if let Some(Frame::Tracked { node, .. }) = &popped {
            debug_assert_eq!(
                Some(*node),
                self.node,
                "ReactiveContext mismatch: expected {:?}, got {:?}",
                self.node,
                node
            );
        }

        popped
    }

    /// Record a read of `node` at `version` in the innermost frame.
    ///
    /// Does nothing if there is no frame or the innermost one is untracked.
    /// Repeated reads of the same node keep the first observed version.
    pub fn track(node: NodeId, version: u64) {
        CONTEXT_STACK.with(|stack| {
            if let Some(Frame::Tracked { dependencies, .. }) = stack.borrow_mut().last_mut() {
                if !dependencies.iter().any(|(dep, _)| *dep == node) {
                    tracing::trace!(dependency = %node, version, "tracked read");
                    dependencies.push((node, version));
                }
            }
        });
    }

    /// Check if reads are currently being recorded.
    pub fn is_tracking() -> bool {
        CONTEXT_STACK.with(|stack| matches!(stack.borrow().last(), Some(Frame::Tracked { .. })))
    }

    /// The innermost tracked computation, skipping untracked frames.
    pub fn current_observer() -> Option<(NodeId, NodeKind)> {
        CONTEXT_STACK.with(|stack| {
            stack.borrow().iter().rev().find_map(|frame| match frame {
                Frame::Tracked { node, kind, .. } => Some((*node, *kind)),
                Frame::Untracked => None,
            })
        })
    }

    /// The computed being evaluated, if the innermost computation is one.
    pub fn computing() -> Option<NodeId> {
        match Self::current_observer() {
            Some((node, NodeKind::Derived)) => Some(node),
            _ => None,
        }
    }

    /// Check whether `node` is anywhere on the evaluation stack.
    pub fn is_evaluating(node: NodeId) -> bool {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .iter()
                .any(|frame| matches!(frame, Frame::Tracked { node: n, .. } if *n == node))
        })
    }

    /// Current stack depth.
    pub fn depth() -> usize {
        CONTEXT_STACK.with(|stack| stack.borrow().len())
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        if !self.finished {
            self.pop();
        }
    }
}
