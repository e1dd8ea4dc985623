use std::collections::{HashMap, HashSet};

use crate::models::{Edge, Node, Workflow};

/// The operational graph: `model_config` nodes and any edge touching one are
/// excluded (spec.md §3, §8 invariant 5).
#[derive(Debug, Clone)]
pub struct Graph {
    pub nodes: HashMap<String, Node>,
    edges_out: HashMap<String, Vec<Edge>>,
    has_incoming: HashSet<String>,
    declaration_order: Vec<String>,
}

impl Graph {
    pub fn from_workflow(workflow: &Workflow) -> Self {
        let mut nodes = HashMap::new();
        let mut declaration_order = Vec::new();
        for n in &workflow.nodes {
            if n.is_model_config() {
                continue;
            }
            declaration_order.push(n.id.clone());
            nodes.insert(n.id.clone(), n.clone());
        }

        let mut edges_out: HashMap<String, Vec<Edge>> = HashMap::new();
        let mut has_incoming = HashSet::new();
        for e in &workflow.edges {
            if !nodes.contains_key(&e.source) || !nodes.contains_key(&e.target) {
                // one endpoint is a model_config node (or unknown) — excluded.
                continue;
            }
            has_incoming.insert(e.target.clone());
            edges_out.entry(e.source.clone()).or_default().push(e.clone());
        }

        Graph {
            nodes,
            edges_out,
            has_incoming,
            declaration_order,
        }
    }

    pub fn outgoing(&self, node_id: &str) -> &[Edge] {
        self.edges_out
            .get(node_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Start-node selection (spec.md §4.1): any operational node with no
    /// incoming operational edges, or whose type is `input`/`trigger`/
    /// `webhook_trigger`. First in declaration order on ties.
    pub fn select_start_node(&self) -> Option<&str> {
        self.declaration_order.iter().find_map(|id| {
            let node = self.nodes.get(id)?;
            let eligible = !self.has_incoming.contains(id) || node.is_entry_eligible();
            eligible.then_some(id.as_str())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn node(id: &str, ty: &str) -> Node {
        Node {
            id: id.into(),
            node_type: ty.into(),
            position: Value::Null,
            data: json!({}),
        }
    }

    fn edge(source: &str, target: &str) -> Edge {
        Edge {
            id: format!("{source}-{target}"),
            source: source.into(),
            target: target.into(),
            source_handle: None,
            target_handle: None,
        }
    }

    #[test]
    fn model_config_edges_are_excluded() {
        let wf = Workflow {
            id: "w".into(),
            name: "w".into(),
            nodes: vec![node("a", "input"), node("b", "default"), node("m", "model_config")],
            edges: vec![edge("a", "b"), edge("m", "b")],
            metadata: Value::Null,
            is_active: false,
            tested: false,
            last_tested: None,
        };
        let graph = Graph::from_workflow(&wf);
        assert!(!graph.nodes.contains_key("m"));
        assert_eq!(graph.outgoing("m").len(), 0);
        assert_eq!(graph.select_start_node(), Some("a"));
    }

    #[test]
    fn start_node_prefers_no_incoming_edges() {
        let wf = Workflow {
            id: "w".into(),
            name: "w".into(),
            nodes: vec![node("a", "default"), node("b", "default")],
            edges: vec![edge("a", "b")],
            metadata: Value::Null,
            is_active: false,
            tested: false,
            last_tested: None,
        };
        let graph = Graph::from_workflow(&wf);
        assert_eq!(graph.select_start_node(), Some("a"));
    }

    #[test]
    fn declaration_order_breaks_ties() {
        let wf = Workflow {
            id: "w".into(),
            name: "w".into(),
            nodes: vec![node("b", "trigger"), node("a", "trigger")],
            edges: vec![],
            metadata: Value::Null,
            is_active: false,
            tested: false,
            last_tested: None,
        };
        let graph = Graph::from_workflow(&wf);
        assert_eq!(graph.select_start_node(), Some("b"));
    }
}
