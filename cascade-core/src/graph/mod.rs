//! Dependency Graph
//!
//! This module implements the dependency graph that records which reactive
//! values read which others.
//!
//! # Overview
//!
//! The graph is a directed acyclic graph (DAG) where:
//!
//! - Nodes represent signals (sources), computeds (derived) and effects (sinks)
//! - Edges represent dependencies: if A reads B, there is an edge from B to A
//!
//! When a signal changes, we traverse the graph to find all affected nodes
//! and mark them dirty. Nothing is recomputed during that walk; dirty nodes
//! are pulled later, on demand.
//!
//! # Design Decisions
//!
//! 1. The graph is centralized and indexed by node ID rather than spread
//!    across the handles, so marking never touches user values.
//!
//! 2. Both forward (dependencies) and reverse (dependents) edges are kept.
//!    Dependents are plain ids: they observe, they never own.
//!
//! 3. A dependency set is replaced wholesale after every successful
//!    evaluation, because conditional reads make it differ between runs.

mod node;
mod propagation;
mod snapshot;

pub use node::{DirtyState, Node, NodeId, NodeKind};
pub use propagation::{DependencyGraph, EdgeDiff};
pub use snapshot::{GraphSnapshot, NodeSnapshot};
