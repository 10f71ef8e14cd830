//! Error Types
//!
//! Every failure the reactive engine can surface is a [`ReactiveError`].
//! Errors are returned from the `try_*` entry points; the plain entry points
//! (`get`, `set`, `batch`) panic with the same error, in the way
//! `RefCell::borrow` relates to `RefCell::try_borrow`.

use std::any::Any;

use thiserror::Error;

use crate::graph::NodeId;

/// Boxed error returned by user compute or effect functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced while evaluating or propagating reactive values.
#[derive(Debug, Error)]
pub enum ReactiveError {
    /// A computed read itself, directly or through other computeds.
    ///
    /// The node is left dirty; the rest of the graph is intact.
    #[error("cycle detected while evaluating node {node}")]
    CycleDetected {
        /// The node that was re-entered.
        node: NodeId,
    },

    /// A compute function returned an error. Nothing was cached.
    #[error("computed {node} failed: {source}")]
    Compute {
        /// The computed whose function failed.
        node: NodeId,
        /// The error returned by the compute function.
        #[source]
        source: BoxError,
    },

    /// An effect function returned an error.
    #[error("effect {node} failed: {source}")]
    Effect {
        /// The failing effect.
        node: NodeId,
        /// The error returned by the effect function.
        #[source]
        source: BoxError,
    },

    /// An effect panicked. The panic was contained to that effect.
    #[error("effect {node} panicked: {message}")]
    EffectPanicked {
        /// The panicking effect.
        node: NodeId,
        /// The panic payload, if it was a string.
        message: String,
    },

    /// A signal was written from inside a compute function.
    #[error("signal {signal} written while computed {computed} was evaluating")]
    WriteDuringCompute {
        /// The signal that was written.
        signal: NodeId,
        /// The computed that was evaluating.
        computed: NodeId,
    },

    /// Effects kept invalidating each other past the configured round limit.
    #[error("settle phase did not converge after {rounds} rounds")]
    SettleLimitExceeded {
        /// Number of rounds run before giving up.
        rounds: usize,
    },
}

impl ReactiveError {
    /// The node the error is attributed to, if any.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Self::CycleDetected { node }
            | Self::Compute { node, .. }
            | Self::Effect { node, .. }
            | Self::EffectPanicked { node, .. } => Some(*node),
            Self::WriteDuringCompute { computed, .. } => Some(*computed),
            Self::SettleLimitExceeded { .. } => None,
        }
    }

    /// Check if this is a cycle error.
    pub fn is_cycle(&self) -> bool {
        matches!(self, Self::CycleDetected { .. })
    }

    /// Wrap an error returned by a compute function.
    ///
    /// A `ReactiveError` raised further upstream and forwarded with `?`
    /// passes through unchanged so the original node stays attributed.
    pub(crate) fn compute(node: NodeId, source: BoxError) -> Self {
        match source.downcast::<ReactiveError>() {
            Ok(inner) => *inner,
            Err(source) => Self::Compute { node, source },
        }
    }

    /// Wrap an error returned by an effect function.
    pub(crate) fn effect(node: NodeId, source: BoxError) -> Self {
        match source.downcast::<ReactiveError>() {
            Ok(inner) => *inner,
            Err(source) => Self::Effect { node, source },
        }
    }

    /// Convert a caught panic payload.
    pub(crate) fn panicked(node: NodeId, payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::EffectPanicked { node, message }
    }
}
