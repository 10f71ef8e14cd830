//! Graph Nodes
//!
//! This module defines the node types that live in the dependency graph.
//! A node carries only graph bookkeeping; the typed value of a signal or
//! computed lives in its handle.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;

/// Unique identifier for a node in the dependency graph.
///
/// Ids are handed out in increasing order, so comparing two ids compares
/// registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// A signal. Roots of the graph: dependents only, no dependencies.
    Source,

    /// A computed. Has dependencies and may have dependents.
    Derived,

    /// An effect. Leaves of the graph: dependencies only.
    Sink,
}

/// Dirty state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DirtyState {
    /// The node's value is up-to-date.
    Clean,

    /// An upstream source was written. The node must check its
    /// dependencies before its value can be trusted again.
    Dirty,
}

/// A node in the dependency graph.
#[derive(Debug)]
pub struct Node {
    id: NodeId,

    kind: NodeKind,

    state: DirtyState,

    /// Bumped whenever the node's observable value changes.
    version: u64,

    /// Nodes this node read during its last successful evaluation, with
    /// the version each one had at the time of the read.
    dependencies: IndexMap<NodeId, u64>,

    /// Nodes that read this one. Back-references only.
    dependents: IndexSet<NodeId>,
}

impl Node {
    /// Create a new node with the given kind.
    pub fn new(kind: NodeKind) -> Self {
        Self::with_id(NodeId::new(), kind)
    }

    /// Create a node for an id allocated elsewhere.
    pub fn with_id(id: NodeId, kind: NodeKind) -> Self {
        Self {
            id,
            kind,
            state: match kind {
                NodeKind::Source => DirtyState::Clean,
                // Start dirty to ensure first evaluation
                NodeKind::Derived | NodeKind::Sink => DirtyState::Dirty,
            },
            version: 0,
            dependencies: IndexMap::new(),
            dependents: IndexSet::new(),
        }
    }

    /// Create a new source (signal) node.
    pub fn source() -> Self {
        Self::new(NodeKind::Source)
    }

    /// Create a new derived (computed) node.
    pub fn derived() -> Self {
        Self::new(NodeKind::Derived)
    }

    /// Create a new sink (effect) node.
    pub fn sink() -> Self {
        Self::new(NodeKind::Sink)
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn state(&self) -> DirtyState {
        self.state
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_clean(&self) -> bool {
        self.state == DirtyState::Clean
    }

    pub fn mark_clean(&mut self) {
        self.state = DirtyState::Clean;
    }

    /// Flag the node dirty. Idempotent.
    pub fn mark_dirty(&mut self) {
        self.state = DirtyState::Dirty;
    }

    /// Record that the node's value changed.
    pub fn bump_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    /// Dependencies in read order, each with its observed version.
    pub fn dependencies(&self) -> &IndexMap<NodeId, u64> {
        &self.dependencies
    }

    pub(crate) fn set_dependencies(&mut self, dependencies: IndexMap<NodeId, u64>) {
        self.dependencies = dependencies;
    }

    pub fn remove_dependency(&mut self, node_id: NodeId) {
        self.dependencies.shift_remove(&node_id);
    }

    pub fn dependents(&self) -> &IndexSet<NodeId> {
        &self.dependents
    }

    pub fn add_dependent(&mut self, node_id: NodeId) {
        self.dependents.insert(node_id);
    }

    pub fn remove_dependent(&mut self, node_id: NodeId) {
        self.dependents.shift_remove(&node_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_unique_and_ordered() {
        let id1 = NodeId::new();
        let id2 = NodeId::new();
        assert_ne!(id1, id2);
        assert!(id1 < id2);
    }

    #[test]
    fn source_node_starts_clean() {
        let node = Node::source();
        assert_eq!(node.kind(), NodeKind::Source);
        assert!(node.is_clean());
        assert_eq!(node.version(), 0);
    }

    #[test]
    fn derived_and_sink_nodes_start_dirty() {
        assert_eq!(Node::derived().state(), DirtyState::Dirty);
        assert_eq!(Node::sink().state(), DirtyState::Dirty);
    }

    #[test]
    fn dependency_management() {
        let mut node = Node::derived();
        let dep1 = NodeId::new();
        let dep2 = NodeId::new();

        let mut deps = IndexMap::new();
        deps.insert(dep1, 3);
        deps.insert(dep2, 0);
        node.set_dependencies(deps);

        assert_eq!(node.dependencies().get(&dep1), Some(&3));
        assert_eq!(node.dependencies().len(), 2);

        node.remove_dependency(dep1);
        assert!(!node.dependencies().contains_key(&dep1));
        // Read order of the remaining entries is preserved
        assert_eq!(node.dependencies().keys().copied().collect::<Vec<_>>(), vec![dep2]);
    }

    #[test]
    fn dirty_state_and_version() {
        let mut node = Node::derived();

        node.mark_clean();
        assert!(node.is_clean());

        node.mark_dirty();
        node.mark_dirty();
        assert_eq!(node.state(), DirtyState::Dirty);

        assert_eq!(node.bump_version(), 1);
        assert_eq!(node.bump_version(), 2);
    }

    #[test]
    fn display_formats_raw_id() {
        let id = NodeId::new();
        assert_eq!(id.to_string(), format!("#{}", id.raw()));
    }
}
