/// Graph value types and structural mutation rules
///
/// A workflow graph is a set of typed nodes and directed edges, persisted as
/// one opaque JSON document per definition row. All mutation goes through the
/// methods here so the structural invariants hold everywhere: node ids are
/// unique, edge ids are unique, every edge endpoint names an existing node,
/// and deleting a node cascades deletion of its edges.

use crate::error::{Result, WorkflowError};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// The kind of work a node declares. Execution itself is owned by external
/// collaborators; this core only tracks the declared shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeType {
    Planning,
    Writing,
    Gate,
    UserInput,
    Code,
    Http,
    File,
    Conditional,
    Loop,
    Subworkflow,
}

/// How an edge is followed by downstream consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeType {
    #[default]
    Default,
    Conditional,
    LoopBack,
}

/// A single unit of work in a workflow graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique node identifier within the graph (e.g., "outline", "draft-1")
    pub id: String,
    /// The node type, which determines how an executor treats it
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Type-specific configuration, opaque to this core
    #[serde(default)]
    pub data: Value,
}

impl Node {
    /// Human-readable name: the `name` key of the node data when present,
    /// otherwise the node id.
    pub fn display_name(&self) -> &str {
        self.data
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.id)
    }
}

/// A directed, optionally conditional connection between two nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    /// Unique edge identifier within the graph
    pub id: String,
    /// Source node id
    pub source: String,
    /// Target node id
    pub target: String,
    #[serde(rename = "type", default)]
    pub edge_type: EdgeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Condition expression evaluated by external executors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

/// Partial node update; fields left `None` keep their current value.
/// `data` replaces the node's data wholesale (no deep merge).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeUpdate {
    #[serde(rename = "type")]
    pub node_type: Option<NodeType>,
    pub data: Option<Value>,
}

/// Partial edge update. Retargeting `source`/`target` re-validates that the
/// new endpoint exists.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EdgeUpdate {
    pub source: Option<String>,
    pub target: Option<String>,
    #[serde(rename = "type")]
    pub edge_type: Option<EdgeType>,
    pub label: Option<String>,
    pub condition: Option<String>,
}

/// The node/edge document of one workflow definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Graph {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl Graph {
    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    pub fn edge(&self, edge_id: &str) -> Option<&Edge> {
        self.edges.iter().find(|e| e.id == edge_id)
    }

    pub fn contains_node(&self, node_id: &str) -> bool {
        self.node(node_id).is_some()
    }

    /// Append a node. Fails with `Conflict` if the id is taken.
    pub fn add_node(&mut self, node: Node) -> Result<()> {
        if node.id.trim().is_empty() {
            return Err(WorkflowError::Validation("node id must not be empty".into()));
        }
        if self.contains_node(&node.id) {
            return Err(WorkflowError::Conflict(format!(
                "node '{}' already exists",
                node.id
            )));
        }
        self.nodes.push(node);
        Ok(())
    }

    /// Shallow-merge an update into an existing node: present fields replace,
    /// absent fields are preserved. Fails with `NotFound` if the node is
    /// absent.
    pub fn update_node(&mut self, node_id: &str, update: NodeUpdate) -> Result<()> {
        let node = self
            .nodes
            .iter_mut()
            .find(|n| n.id == node_id)
            .ok_or_else(|| WorkflowError::NotFound(format!("node '{}'", node_id)))?;
        if let Some(node_type) = update.node_type {
            node.node_type = node_type;
        }
        if let Some(data) = update.data {
            node.data = data;
        }
        Ok(())
    }

    /// Remove a node and every edge whose source or target references it.
    pub fn delete_node(&mut self, node_id: &str) -> Result<()> {
        let before = self.nodes.len();
        self.nodes.retain(|n| n.id != node_id);
        if self.nodes.len() == before {
            return Err(WorkflowError::NotFound(format!("node '{}'", node_id)));
        }
        self.edges
            .retain(|e| e.source != node_id && e.target != node_id);
        Ok(())
    }

    /// Append an edge after validating both endpoints exist.
    pub fn create_edge(&mut self, edge: Edge) -> Result<()> {
        if edge.id.trim().is_empty() {
            return Err(WorkflowError::Validation("edge id must not be empty".into()));
        }
        if self.edge(&edge.id).is_some() {
            return Err(WorkflowError::Conflict(format!(
                "edge '{}' already exists",
                edge.id
            )));
        }
        for endpoint in [&edge.source, &edge.target] {
            if !self.contains_node(endpoint) {
                return Err(WorkflowError::EndpointNotFound(format!(
                    "node '{}' referenced by edge '{}'",
                    endpoint, edge.id
                )));
            }
        }
        self.edges.push(edge);
        Ok(())
    }

    /// Shallow-merge an update into an existing edge, re-validating any
    /// retargeted endpoint.
    pub fn update_edge(&mut self, edge_id: &str, update: EdgeUpdate) -> Result<()> {
        let idx = self
            .edges
            .iter()
            .position(|e| e.id == edge_id)
            .ok_or_else(|| WorkflowError::NotFound(format!("edge '{}'", edge_id)))?;
        for endpoint in [update.source.as_deref(), update.target.as_deref()]
            .into_iter()
            .flatten()
        {
            if !self.contains_node(endpoint) {
                return Err(WorkflowError::EndpointNotFound(format!(
                    "node '{}' referenced by edge '{}'",
                    endpoint, edge_id
                )));
            }
        }
        let edge = &mut self.edges[idx];
        if let Some(source) = update.source {
            edge.source = source;
        }
        if let Some(target) = update.target {
            edge.target = target;
        }
        if let Some(edge_type) = update.edge_type {
            edge.edge_type = edge_type;
        }
        if let Some(label) = update.label {
            edge.label = Some(label);
        }
        if let Some(condition) = update.condition {
            edge.condition = Some(condition);
        }
        Ok(())
    }

    pub fn delete_edge(&mut self, edge_id: &str) -> Result<()> {
        let before = self.edges.len();
        self.edges.retain(|e| e.id != edge_id);
        if self.edges.len() == before {
            return Err(WorkflowError::NotFound(format!("edge '{}'", edge_id)));
        }
        Ok(())
    }

    /// Node ids in a linear order suitable for phase lists.
    ///
    /// Builds a petgraph DiGraph over the non-loop-back edges and
    /// topologically sorts it. Loop-back edges are excluded so looping
    /// workflows still linearize; if the remaining graph is cyclic anyway,
    /// declaration order is returned instead of failing the import.
    pub fn linear_order(&self) -> Vec<String> {
        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let mut index_of: HashMap<&str, NodeIndex> = HashMap::new();
        for node in &self.nodes {
            index_of.insert(&node.id, graph.add_node(node.id.as_str()));
        }
        for edge in &self.edges {
            if edge.edge_type == EdgeType::LoopBack {
                continue;
            }
            if let (Some(&a), Some(&b)) = (index_of.get(edge.source.as_str()), index_of.get(edge.target.as_str())) {
                graph.add_edge(a, b, ());
            }
        }
        match toposort(&graph, None) {
            Ok(order) => order.into_iter().map(|ix| graph[ix].to_string()).collect(),
            Err(_) => self.nodes.iter().map(|n| n.id.clone()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(id: &str, node_type: NodeType) -> Node {
        Node {
            id: id.to_string(),
            node_type,
            data: json!({}),
        }
    }

    fn edge(id: &str, source: &str, target: &str) -> Edge {
        Edge {
            id: id.to_string(),
            source: source.to_string(),
            target: target.to_string(),
            edge_type: EdgeType::Default,
            label: None,
            condition: None,
        }
    }

    fn pipeline() -> Graph {
        let mut g = Graph::default();
        g.add_node(node("n1", NodeType::Planning)).unwrap();
        g.add_node(node("n2", NodeType::Writing)).unwrap();
        g.add_node(node("n3", NodeType::Gate)).unwrap();
        g.create_edge(edge("e1", "n1", "n2")).unwrap();
        g.create_edge(edge("e2", "n2", "n3")).unwrap();
        g
    }

    #[test]
    fn test_add_node_rejects_duplicate() {
        let mut g = pipeline();
        let err = g.add_node(node("n1", NodeType::Code)).unwrap_err();
        assert!(matches!(err, WorkflowError::Conflict(_)));
        assert_eq!(g.nodes.len(), 3);
    }

    #[test]
    fn test_create_edge_rejects_missing_endpoint() {
        let mut g = pipeline();
        let err = g.create_edge(edge("e3", "n3", "ghost")).unwrap_err();
        assert!(matches!(err, WorkflowError::EndpointNotFound(_)));
        let err = g.create_edge(edge("e3", "ghost", "n1")).unwrap_err();
        assert!(matches!(err, WorkflowError::EndpointNotFound(_)));
    }

    #[test]
    fn test_create_edge_rejects_duplicate_id() {
        let mut g = pipeline();
        let err = g.create_edge(edge("e1", "n1", "n3")).unwrap_err();
        assert!(matches!(err, WorkflowError::Conflict(_)));
    }

    #[test]
    fn test_delete_node_cascades_edges() {
        let mut g = pipeline();
        g.add_node(node("n4", NodeType::Writing)).unwrap();
        g.create_edge(edge("e3", "n3", "n4")).unwrap();

        g.delete_node("n3").unwrap();

        let ids: Vec<&str> = g.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["n1", "n2", "n4"]);
        assert!(g
            .edges
            .iter()
            .all(|e| e.source != "n3" && e.target != "n3"));
        assert_eq!(g.edges.len(), 1);
    }

    #[test]
    fn test_update_node_replaces_data_wholesale() {
        let mut g = pipeline();
        g.update_node(
            "n1",
            NodeUpdate {
                node_type: None,
                data: Some(json!({"name": "Outline"})),
            },
        )
        .unwrap();
        let n = g.node("n1").unwrap();
        assert_eq!(n.node_type, NodeType::Planning);
        assert_eq!(n.data, json!({"name": "Outline"}));
        assert_eq!(n.display_name(), "Outline");
    }

    #[test]
    fn test_update_missing_node_fails() {
        let mut g = pipeline();
        let err = g.update_node("ghost", NodeUpdate::default()).unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound(_)));
    }

    #[test]
    fn test_update_edge_revalidates_endpoints() {
        let mut g = pipeline();
        let err = g
            .update_edge(
                "e1",
                EdgeUpdate {
                    target: Some("ghost".to_string()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, WorkflowError::EndpointNotFound(_)));
        // Failed update leaves the edge untouched.
        assert_eq!(g.edge("e1").unwrap().target, "n2");

        g.update_edge(
            "e1",
            EdgeUpdate {
                target: Some("n3".to_string()),
                edge_type: Some(EdgeType::Conditional),
                condition: Some("draft.approved".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        let e = g.edge("e1").unwrap();
        assert_eq!(e.target, "n3");
        assert_eq!(e.edge_type, EdgeType::Conditional);
    }

    #[test]
    fn test_delete_edge() {
        let mut g = pipeline();
        g.delete_edge("e1").unwrap();
        assert!(g.edge("e1").is_none());
        let err = g.delete_edge("e1").unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound(_)));
    }

    #[test]
    fn test_linear_order_follows_edges() {
        let mut g = Graph::default();
        g.add_node(node("review", NodeType::Gate)).unwrap();
        g.add_node(node("outline", NodeType::Planning)).unwrap();
        g.add_node(node("draft", NodeType::Writing)).unwrap();
        g.create_edge(edge("e1", "outline", "draft")).unwrap();
        g.create_edge(edge("e2", "draft", "review")).unwrap();

        assert_eq!(g.linear_order(), vec!["outline", "draft", "review"]);
    }

    #[test]
    fn test_linear_order_ignores_loop_back_edges() {
        let mut g = pipeline();
        let mut back = edge("loop", "n3", "n1");
        back.edge_type = EdgeType::LoopBack;
        g.create_edge(back).unwrap();

        assert_eq!(g.linear_order(), vec!["n1", "n2", "n3"]);
    }

    #[test]
    fn test_node_type_wire_names() {
        assert_eq!(
            serde_json::to_value(NodeType::UserInput).unwrap(),
            json!("user-input")
        );
        assert_eq!(
            serde_json::to_value(EdgeType::LoopBack).unwrap(),
            json!("loop-back")
        );
        let n: Node = serde_json::from_value(json!({"id": "g1", "type": "gate"})).unwrap();
        assert_eq!(n.node_type, NodeType::Gate);
    }
}
