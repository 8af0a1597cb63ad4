use crate::{ConnectionKind, Flow, NodeId};
use petgraph::algo::{has_path_connecting, is_cyclic_directed};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::HashMap;

/// Node-level projection of one of a flow's two edge sets.
///
/// Graph nodes are added in the flow's insertion order, so comparing
/// `NodeIndex` values compares insertion positions.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    graph: DiGraph<NodeId, ()>,
    indices: HashMap<NodeId, NodeIndex>,
}

impl DependencyGraph {
    /// Every data connection as a producer -> consumer edge
    pub fn data(flow: &Flow) -> Self {
        Self::build(flow, |c| c.kind == ConnectionKind::Data)
    }

    /// Control connections, minus loop back-edges
    pub fn control(flow: &Flow) -> Self {
        Self::build(flow, |c| {
            c.kind == ConnectionKind::Control && !flow.is_back_edge(c.from.node, &c.from.port, c.to.node)
        })
    }

    fn build(flow: &Flow, include: impl Fn(&crate::Connection) -> bool) -> Self {
        let mut graph = DiGraph::new();
        let mut indices = HashMap::new();

        for node in flow.nodes() {
            indices.insert(node.id, graph.add_node(node.id));
        }

        for conn in flow.connections().iter().filter(|c| include(c)) {
            if let (Some(&from), Some(&to)) = (indices.get(&conn.from.node), indices.get(&conn.to.node)) {
                graph.add_edge(from, to, ());
            }
        }

        Self { graph, indices }
    }

    /// Add an edge between two known nodes; unknown nodes are ignored
    pub fn add_edge(&mut self, from: NodeId, to: NodeId) {
        if let (Some(&a), Some(&b)) = (self.indices.get(&from), self.indices.get(&to)) {
            self.graph.add_edge(a, b, ());
        }
    }

    pub fn is_acyclic(&self) -> bool {
        !is_cyclic_directed(&self.graph)
    }

    pub fn has_path(&self, from: NodeId, to: NodeId) -> bool {
        match (self.indices.get(&from), self.indices.get(&to)) {
            (Some(&a), Some(&b)) => has_path_connecting(&self.graph, a, b, None),
            _ => false,
        }
    }

    pub fn index_of(&self, node: NodeId) -> Option<NodeIndex> {
        self.indices.get(&node).copied()
    }

    pub fn node_at(&self, index: NodeIndex) -> Option<NodeId> {
        self.graph.node_weight(index).copied()
    }

    /// Direct upstream nodes (deduplicated)
    pub fn predecessors(&self, node: NodeId) -> Vec<NodeId> {
        self.neighbors(node, Direction::Incoming)
    }

    /// Direct downstream nodes (deduplicated)
    pub fn successors(&self, node: NodeId) -> Vec<NodeId> {
        self.neighbors(node, Direction::Outgoing)
    }

    fn neighbors(&self, node: NodeId, direction: Direction) -> Vec<NodeId> {
        let Some(&idx) = self.indices.get(&node) else {
            return Vec::new();
        };
        let mut found: Vec<NodeIndex> = self.graph.neighbors_directed(idx, direction).collect();
        found.sort();
        found.dedup();
        found.into_iter().map(|i| self.graph[i]).collect()
    }
}
