//! Dependency Graph and Mark Phase
//!
//! The graph stores every live node by id together with its forward
//! (dependencies) and reverse (dependents) edges.
//!
//! # Mark
//!
//! A write to a source never recomputes anything by itself. Instead the
//! mark phase walks the dependents of the written source breadth-first:
//!
//! 1. Every derived node reached is flagged dirty.
//! 2. Every sink reached is collected, once, however many paths lead to it.
//!
//! The settle phase (see `reactive::runtime`) later pulls dirty derived
//! nodes on demand. Keeping the two phases apart is what makes propagation
//! glitch-free: no sink runs while another path to it is still stale.

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::IndexMap;

use super::node::{DirtyState, Node, NodeId, NodeKind};

/// Result of replacing a node's dependency set.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EdgeDiff {
    /// Dependencies subscribed by this evaluation.
    pub added: Vec<NodeId>,
    /// Dependencies no longer read, now unsubscribed.
    pub removed: Vec<NodeId>,
}

impl EdgeDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// The dependency graph.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// All nodes in the graph, indexed by ID.
    nodes: HashMap<NodeId, Node>,
}

impl DependencyGraph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node to the graph.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = node.id();
        self.nodes.insert(id, node);
        id
    }

    /// Remove a node from the graph.
    ///
    /// Also removes all edges involving this node.
    pub fn remove_node(&mut self, node_id: NodeId) -> Option<Node> {
        let node = self.nodes.remove(&node_id)?;

        for dep_id in node.dependencies().keys() {
            if let Some(dep) = self.nodes.get_mut(dep_id) {
                dep.remove_dependent(node_id);
            }
        }

        for dependent_id in node.dependents() {
            if let Some(dependent) = self.nodes.get_mut(dependent_id) {
                dependent.remove_dependency(node_id);
            }
        }

        Some(node)
    }

    pub fn contains(&self, node_id: NodeId) -> bool {
        self.nodes.contains_key(&node_id)
    }

    pub fn get_node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    pub fn get_node_mut(&mut self, node_id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&node_id)
    }

    pub fn kind(&self, node_id: NodeId) -> Option<NodeKind> {
        self.nodes.get(&node_id).map(Node::kind)
    }

    pub fn version(&self, node_id: NodeId) -> Option<u64> {
        self.nodes.get(&node_id).map(Node::version)
    }

    pub fn state(&self, node_id: NodeId) -> Option<DirtyState> {
        self.nodes.get(&node_id).map(Node::state)
    }

    /// Iterate over all nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        let mut nodes: Vec<_> = self.nodes.values().collect();
        nodes.sort_by_key(|node| node.id());
        nodes.into_iter()
    }

    /// Replace the dependency set of `node_id` with `dependencies`.
    ///
    /// Edges are diffed against the previous set: dependencies no longer read
    /// are unsubscribed and new ones subscribed. An empty set detaches the
    /// node completely. Dependencies that are no longer in the graph are
    /// dropped. Does nothing if `node_id` itself is gone.
    pub fn replace_dependencies<I>(&mut self, node_id: NodeId, dependencies: I) -> EdgeDiff
    where
        I: IntoIterator<Item = (NodeId, u64)>,
    {
        if !self.nodes.contains_key(&node_id) {
            return EdgeDiff::default();
        }

        let next: IndexMap<NodeId, u64> = dependencies
            .into_iter()
            .filter(|(dep, _)| *dep != node_id && self.nodes.contains_key(dep))
            .collect();

        let previous = match self.nodes.get(&node_id) {
            Some(node) => node.dependencies().clone(),
            None => return EdgeDiff::default(),
        };

        let mut diff = EdgeDiff::default();

        for dep_id in previous.keys().filter(|dep| !next.contains_key(*dep)) {
            if let Some(dep) = self.nodes.get_mut(dep_id) {
                dep.remove_dependent(node_id);
            }
            diff.removed.push(*dep_id);
        }

        for dep_id in next.keys().filter(|dep| !previous.contains_key(*dep)) {
            if let Some(dep) = self.nodes.get_mut(dep_id) {
                dep.add_dependent(node_id);
            }
            diff.added.push(*dep_id);
        }

        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.set_dependencies(next);
        }

        diff
    }

    /// Mark phase: flag everything downstream of `source_id` and collect the
    /// sinks that must be settled.
    ///
    /// Sinks are returned in discovery order, each at most once.
    pub fn mark(&mut self, source_id: NodeId) -> Vec<NodeId> {
        let mut sinks = Vec::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();

        // Start with the source node's direct dependents
        if let Some(source) = self.nodes.get(&source_id) {
            queue.extend(source.dependents().iter().copied());
        }

        // BFS over dependents
        while let Some(node_id) = queue.pop_front() {
            if !visited.insert(node_id) {
                continue;
            }

            let Some(node) = self.nodes.get_mut(&node_id) else {
                continue;
            };

            match node.kind() {
                NodeKind::Derived => node.mark_dirty(),
                NodeKind::Sink => {
                    node.mark_dirty();
                    sinks.push(node_id);
                }
                NodeKind::Source => {}
            }

            queue.extend(node.dependents().iter().copied());
        }

        sinks
    }

    /// Get the total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(ids: &[NodeId]) -> Vec<(NodeId, u64)> {
        ids.iter().map(|id| (*id, 0)).collect()
    }

    #[test]
    fn add_and_remove_nodes() {
        let mut graph = DependencyGraph::new();

        let id1 = graph.add_node(Node::source());
        let id2 = graph.add_node(Node::derived());

        assert_eq!(graph.node_count(), 2);

        graph.remove_node(id1);
        assert_eq!(graph.node_count(), 1);
        assert!(graph.get_node(id1).is_none());
        assert!(graph.get_node(id2).is_some());
    }

    #[test]
    fn removing_a_node_detaches_both_directions() {
        let mut graph = DependencyGraph::new();

        let source = graph.add_node(Node::source());
        let derived = graph.add_node(Node::derived());
        let sink = graph.add_node(Node::sink());

        graph.replace_dependencies(derived, deps(&[source]));
        graph.replace_dependencies(sink, deps(&[derived]));

        graph.remove_node(derived);

        assert!(graph.get_node(source).unwrap().dependents().is_empty());
        assert!(graph.get_node(sink).unwrap().dependencies().is_empty());
    }

    #[test]
    fn replace_dependencies_diffs_edges() {
        let mut graph = DependencyGraph::new();

        let a = graph.add_node(Node::source());
        let b = graph.add_node(Node::source());
        let c = graph.add_node(Node::source());
        let derived = graph.add_node(Node::derived());

        let diff = graph.replace_dependencies(derived, deps(&[a, b]));
        assert_eq!(diff.added, vec![a, b]);
        assert!(diff.removed.is_empty());

        // Conditional branch switched from `a` to `c`
        let diff = graph.replace_dependencies(derived, deps(&[b, c]));
        assert_eq!(diff.added, vec![c]);
        assert_eq!(diff.removed, vec![a]);

        assert!(!graph.get_node(a).unwrap().dependents().contains(&derived));
        assert!(graph.get_node(b).unwrap().dependents().contains(&derived));
        assert!(graph.get_node(c).unwrap().dependents().contains(&derived));

        // Unchanged set is a no-op diff
        assert!(graph.replace_dependencies(derived, deps(&[b, c])).is_empty());
    }

    #[test]
    fn empty_dependency_set_fully_detaches() {
        let mut graph = DependencyGraph::new();

        let a = graph.add_node(Node::source());
        let derived = graph.add_node(Node::derived());

        graph.replace_dependencies(derived, deps(&[a]));
        let diff = graph.replace_dependencies(derived, Vec::new());

        assert_eq!(diff.removed, vec![a]);
        assert!(graph.get_node(a).unwrap().dependents().is_empty());
        assert!(graph.get_node(derived).unwrap().dependencies().is_empty());
    }

    #[test]
    fn replace_dependencies_ignores_missing_nodes() {
        let mut graph = DependencyGraph::new();

        let a = graph.add_node(Node::source());
        let gone = NodeId::new();

        // Missing dependent: nothing is subscribed
        assert!(graph.replace_dependencies(gone, deps(&[a])).is_empty());
        assert!(graph.get_node(a).unwrap().dependents().is_empty());

        // Missing dependency: dropped from the set
        let derived = graph.add_node(Node::derived());
        let diff = graph.replace_dependencies(derived, deps(&[gone, a]));
        assert_eq!(diff.added, vec![a]);
    }

    #[test]
    fn mark_flags_derived_and_collects_sinks_once() {
        let mut graph = DependencyGraph::new();

        // Diamond: source -> left, right -> sink
        let source = graph.add_node(Node::source());
        let left = graph.add_node(Node::derived());
        let right = graph.add_node(Node::derived());
        let sink = graph.add_node(Node::sink());

        graph.replace_dependencies(left, deps(&[source]));
        graph.replace_dependencies(right, deps(&[source]));
        graph.replace_dependencies(sink, deps(&[left, right, source]));

        for id in [left, right, sink] {
            graph.get_node_mut(id).unwrap().mark_clean();
        }

        let sinks = graph.mark(source);

        assert_eq!(sinks, vec![sink]);
        assert_eq!(graph.state(left), Some(DirtyState::Dirty));
        assert_eq!(graph.state(right), Some(DirtyState::Dirty));
        // Nothing was recomputed, so no version moved
        assert_eq!(graph.version(left), Some(0));
    }

    #[test]
    fn mark_leaves_unrelated_nodes_alone() {
        let mut graph = DependencyGraph::new();

        let a = graph.add_node(Node::source());
        let b = graph.add_node(Node::source());
        let from_b = graph.add_node(Node::derived());
        graph.replace_dependencies(from_b, deps(&[b]));
        graph.get_node_mut(from_b).unwrap().mark_clean();

        assert!(graph.mark(a).is_empty());
        assert_eq!(graph.state(from_b), Some(DirtyState::Clean));
    }

    #[test]
    fn mark_reaches_transitive_dependents() {
        let mut graph = DependencyGraph::new();

        // Chain: source -> d1 -> d2 -> sink
        let source = graph.add_node(Node::source());
        let d1 = graph.add_node(Node::derived());
        let d2 = graph.add_node(Node::derived());
        let sink = graph.add_node(Node::sink());

        graph.replace_dependencies(d1, deps(&[source]));
        graph.replace_dependencies(d2, deps(&[d1]));
        graph.replace_dependencies(sink, deps(&[d2]));

        graph.get_node_mut(d2).unwrap().mark_clean();

        assert_eq!(graph.mark(source), vec![sink]);
        assert_eq!(graph.state(d2), Some(DirtyState::Dirty));
    }
}
