//! Graph: the nodes and edges contributed by one parsed document

use super::edge::GuacEdge;
use super::node::GuacNode;
use serde::{Deserialize, Serialize};

/// A graph fragment, or the concatenation of several.
///
/// Merging is plain concatenation: no identity-based deduplication
/// happens here. The storage layer resolves identity through its indices.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub nodes: Vec<GuacNode>,
    pub edges: Vec<GuacEdge>,
}

impl Graph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node(mut self, node: GuacNode) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn with_edge(mut self, edge: GuacEdge) -> Self {
        self.edges.push(edge);
        self
    }

    /// Append another graph's nodes and edges after this one's.
    pub fn append_graph(&mut self, other: Graph) {
        self.nodes.extend(other.nodes);
        self.edges.extend(other.edges);
    }

    /// Merge a batch of fragments, preserving input order.
    pub fn merge(fragments: impl IntoIterator<Item = Graph>) -> Graph {
        let mut combined = Graph::new();
        for fragment in fragments {
            combined.append_graph(fragment);
        }
        combined
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// True if the graph has neither nodes nor edges
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}
