use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{CoreError, FlowEdge, FlowNode, PagePatch, Position};

/// Immutable copy of the whole canvas, captured before a mutation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<FlowNode>,
    pub edges: Vec<FlowEdge>,
}

/// Live page/connection graph of one product.
///
/// Every edge's endpoints exist in `nodes`; constructors drop edges that
/// would violate this and mutators refuse them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowGraph {
    nodes: Vec<FlowNode>,
    edges: Vec<FlowEdge>,
}

impl FlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from stored rows, discarding dangling edges.
    pub fn from_parts(nodes: Vec<FlowNode>, edges: Vec<FlowEdge>) -> Self {
        let ids: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        let (kept, dropped): (Vec<FlowEdge>, Vec<FlowEdge>) = edges
            .into_iter()
            .partition(|e| ids.contains(e.source.as_str()) && ids.contains(e.target.as_str()));
        for edge in &dropped {
            warn!(edge_id = %edge.id, source = %edge.source, target = %edge.target, "dropping dangling connection");
        }
        Self { nodes, edges: kept }
    }

    pub fn nodes(&self) -> &[FlowNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[FlowEdge] {
        &self.edges
    }

    pub fn node(&self, id: &str) -> Option<&FlowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn edge(&self, id: &str) -> Option<&FlowEdge> {
        self.edges.iter().find(|e| e.id == id)
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.node(id).is_some()
    }

    pub fn is_connected(&self, source: &str, target: &str) -> bool {
        self.edges
            .iter()
            .any(|e| e.source == source && e.target == target)
    }

    pub fn edges_touching<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a FlowEdge> + 'a {
        self.edges.iter().filter(move |e| e.touches(node_id))
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: GraphSnapshot) {
        *self = Self::from_parts(snapshot.nodes, snapshot.edges);
    }

    /// Check that a new connection between two pages would be valid.
    pub fn validate_connection(&self, source: &str, target: &str) -> Result<(), CoreError> {
        if source == target {
            return Err(CoreError::SelfConnection(source.to_string()));
        }
        for endpoint in [source, target] {
            if !self.contains_node(endpoint) {
                return Err(CoreError::UnknownNode(endpoint.to_string()));
            }
        }
        if self.is_connected(source, target) {
            return Err(CoreError::DuplicateConnection {
                from: source.to_string(),
                to: target.to_string(),
            });
        }
        Ok(())
    }

    /// Move a page. Returns its previous position.
    pub fn set_position(&mut self, id: &str, position: Position) -> Result<Position, CoreError> {
        let node = self
            .nodes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| CoreError::UnknownNode(id.to_string()))?;
        Ok(std::mem::replace(&mut node.position, position))
    }

    pub fn update_page(&mut self, id: &str, patch: &PagePatch) -> Result<(), CoreError> {
        let node = self
            .nodes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| CoreError::UnknownNode(id.to_string()))?;
        patch.apply(&mut node.data);
        Ok(())
    }

    pub fn push_node(&mut self, node: FlowNode) {
        self.nodes.push(node);
    }

    pub fn push_edge(&mut self, edge: FlowEdge) -> Result<(), CoreError> {
        for endpoint in [&edge.source, &edge.target] {
            if !self.contains_node(endpoint) {
                return Err(CoreError::DanglingEdge {
                    edge: edge.id.clone(),
                    endpoint: endpoint.clone(),
                });
            }
        }
        self.edges.push(edge);
        Ok(())
    }

    /// Remove an edge, returning it with its former index so it can be put back.
    pub fn remove_edge(&mut self, id: &str) -> Option<(usize, FlowEdge)> {
        let idx = self.edges.iter().position(|e| e.id == id)?;
        Some((idx, self.edges.remove(idx)))
    }

    /// Re-insert an edge previously taken out with [`remove_edge`](Self::remove_edge).
    pub fn reinsert_edge(&mut self, index: usize, edge: FlowEdge) -> Result<(), CoreError> {
        for endpoint in [&edge.source, &edge.target] {
            if !self.contains_node(endpoint) {
                return Err(CoreError::DanglingEdge {
                    edge: edge.id.clone(),
                    endpoint: endpoint.clone(),
                });
            }
        }
        let index = index.min(self.edges.len());
        self.edges.insert(index, edge);
        Ok(())
    }

    /// Remove a page and every connection whose source or target is that page.
    pub fn remove_node(&mut self, id: &str) -> Option<(FlowNode, Vec<FlowEdge>)> {
        let idx = self.nodes.iter().position(|n| n.id == id)?;
        let node = self.nodes.remove(idx);
        let (removed, kept): (Vec<FlowEdge>, Vec<FlowEdge>) =
            std::mem::take(&mut self.edges).into_iter().partition(|e| e.touches(id));
        self.edges = kept;
        Some((node, removed))
    }
}

impl From<GraphSnapshot> for FlowGraph {
    fn from(snapshot: GraphSnapshot) -> Self {
        Self::from_parts(snapshot.nodes, snapshot.edges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PageData;

    fn page(id: &str, x: f64, y: f64) -> FlowNode {
        FlowNode::new(
            id,
            Position::new(x, y),
            PageData {
                name: id.to_uppercase(),
                ..Default::default()
            },
        )
    }

    fn triangle() -> FlowGraph {
        FlowGraph::from_parts(
            vec![page("a", 0.0, 0.0), page("b", 300.0, 0.0), page("c", 0.0, 300.0)],
            vec![
                FlowEdge::new("e1", "a", "b"),
                FlowEdge::new("e2", "b", "c"),
                FlowEdge::new("e3", "c", "a"),
                FlowEdge::new("e4", "b", "a"),
            ],
        )
    }

    #[test]
    fn dangling_edges_are_dropped_on_construction() {
        let graph = FlowGraph::from_parts(
            vec![page("a", 0.0, 0.0)],
            vec![FlowEdge::new("e1", "a", "ghost")],
        );
        assert!(graph.edges().is_empty());
    }

    #[test]
    fn removing_node_cascades_only_to_touching_edges() {
        let mut graph = triangle();
        let (node, removed) = graph.remove_node("a").unwrap();
        assert_eq!(node.id, "a");
        let mut removed_ids: Vec<_> = removed.iter().map(|e| e.id.as_str()).collect();
        removed_ids.sort();
        assert_eq!(removed_ids, vec!["e1", "e3", "e4"]);
        assert_eq!(graph.edges().len(), 1);
        assert_eq!(graph.edges()[0].id, "e2");
    }

    #[test]
    fn push_edge_refuses_missing_endpoint() {
        let mut graph = triangle();
        let err = graph.push_edge(FlowEdge::new("e9", "a", "zzz")).unwrap_err();
        assert!(matches!(err, CoreError::DanglingEdge { .. }));
    }

    #[test]
    fn connection_validation() {
        let graph = triangle();
        assert!(matches!(
            graph.validate_connection("a", "a"),
            Err(CoreError::SelfConnection(_))
        ));
        assert!(matches!(
            graph.validate_connection("a", "b"),
            Err(CoreError::DuplicateConnection { .. })
        ));
        assert!(matches!(
            graph.validate_connection("a", "nope"),
            Err(CoreError::UnknownNode(_))
        ));
        assert!(graph.validate_connection("a", "c").is_ok());
    }

    #[test]
    fn removed_edge_goes_back_where_it_was() {
        let mut graph = triangle();
        let before = graph.snapshot();
        let (idx, edge) = graph.remove_edge("e2").unwrap();
        graph.reinsert_edge(idx, edge).unwrap();
        assert_eq!(graph.snapshot(), before);
    }

    #[test]
    fn set_position_returns_previous() {
        let mut graph = triangle();
        let old = graph.set_position("b", Position::new(500.0, 0.0)).unwrap();
        assert_eq!(old, Position::new(300.0, 0.0));
        assert!(graph.set_position("zzz", Position::default()).is_err());
    }
}
