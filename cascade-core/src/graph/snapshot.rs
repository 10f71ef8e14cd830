//! Graph Snapshots
//!
//! A serializable, point-in-time view of the dependency graph for debugging
//! tools and tests.

use serde::Serialize;

use super::node::{DirtyState, NodeId, NodeKind};
use super::propagation::DependencyGraph;

/// One node in a [`GraphSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub kind: NodeKind,
    pub state: DirtyState,
    pub version: u64,
    /// Dependencies in read order.
    pub dependencies: Vec<NodeId>,
    pub dependents: Vec<NodeId>,
}

/// The whole graph at a quiescent point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphSnapshot {
    /// Number of settle epochs completed so far.
    pub epoch: u64,
    /// Nodes in id (registration) order.
    pub nodes: Vec<NodeSnapshot>,
}

impl GraphSnapshot {
    pub fn node(&self, id: NodeId) -> Option<&NodeSnapshot> {
        self.nodes.iter().find(|node| node.id == id)
    }

    /// Serialize the snapshot as JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl DependencyGraph {
    /// Capture the current graph.
    pub fn snapshot(&self, epoch: u64) -> GraphSnapshot {
        let nodes = self
            .nodes()
            .map(|node| NodeSnapshot {
                id: node.id(),
                kind: node.kind(),
                state: node.state(),
                version: node.version(),
                dependencies: node.dependencies().keys().copied().collect(),
                dependents: node.dependents().iter().copied().collect(),
            })
            .collect();

        GraphSnapshot { epoch, nodes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Node;

    #[test]
    fn snapshot_lists_nodes_in_registration_order() {
        let mut graph = DependencyGraph::new();
        let source = graph.add_node(Node::source());
        let derived = graph.add_node(Node::derived());
        graph.replace_dependencies(derived, vec![(source, 0)]);

        let snapshot = graph.snapshot(3);

        assert_eq!(snapshot.epoch, 3);
        assert_eq!(snapshot.nodes.len(), 2);
        assert_eq!(snapshot.nodes[0].id, source);
        assert_eq!(snapshot.node(source).unwrap().dependents, vec![derived]);
        assert_eq!(snapshot.node(derived).unwrap().dependencies, vec![source]);
    }

    #[test]
    fn snapshot_serializes_to_json() {
        let mut graph = DependencyGraph::new();
        let source = graph.add_node(Node::source());

        let json = graph.snapshot(0).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["epoch"], 0);
        assert_eq!(value["nodes"][0]["id"], source.raw());
        assert_eq!(value["nodes"][0]["kind"], "source");
        assert_eq!(value["nodes"][0]["state"], "clean");
    }
}
