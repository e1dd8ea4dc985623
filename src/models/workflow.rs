use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

/// A persisted directed graph of typed nodes, keyed by a string id chosen by the
/// editor (not necessarily a uuid).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub tested: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_tested: Option<OffsetDateTime>,
}

impl Workflow {
    /// Whether `nodes`/`edges` differ from `other` in a way that should clear
    /// `tested`/`is_active` on save (spec.md §3, §8 invariant 4).
    pub fn graph_differs_from(&self, other: &Workflow) -> bool {
        self.nodes_fingerprint() != other.nodes_fingerprint()
            || self.edges_fingerprint() != other.edges_fingerprint()
    }

    fn nodes_fingerprint(&self) -> Vec<(String, String, Value)> {
        self.nodes
            .iter()
            .map(|n| (n.id.clone(), n.node_type.clone(), n.data.clone()))
            .collect()
    }

    fn edges_fingerprint(&self) -> Vec<(String, String, String)> {
        self.edges
            .iter()
            .map(|e| (e.id.clone(), e.source.clone(), e.target.clone()))
            .collect()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub position: Value,
    #[serde(default)]
    pub data: Value,
}

impl Node {
    pub fn is_model_config(&self) -> bool {
        self.node_type == "model_config"
    }

    pub fn is_entry_eligible(&self) -> bool {
        matches!(
            self.node_type.as_str(),
            "input" | "trigger" | "webhook_trigger"
        )
    }

    pub fn is_webhook_wait(&self) -> bool {
        matches!(self.node_type.as_str(), "webhook_trigger" | "webhook")
    }

    pub fn label(&self) -> Option<&str> {
        self.data.get("label").and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    #[serde(default)]
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(
        rename = "sourceHandle",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub source_handle: Option<String>,
    #[serde(
        rename = "targetHandle",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub target_handle: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(id: &str, ty: &str) -> Node {
        Node {
            id: id.into(),
            node_type: ty.into(),
            position: Value::Null,
            data: json!({}),
        }
    }

    #[test]
    fn graph_differs_detects_node_change() {
        let a = Workflow {
            id: "w".into(),
            name: "w".into(),
            nodes: vec![node("a", "input")],
            edges: vec![],
            metadata: Value::Null,
            is_active: false,
            tested: true,
            last_tested: None,
        };
        let mut b = a.clone();
        b.nodes[0].node_type = "trigger".into();
        assert!(a.graph_differs_from(&b));
        assert!(!a.graph_differs_from(&a.clone()));
    }

    #[test]
    fn model_config_node_is_not_entry_eligible() {
        let n = node("m", "model_config");
        assert!(n.is_model_config());
        assert!(!n.is_entry_eligible());
    }
}
