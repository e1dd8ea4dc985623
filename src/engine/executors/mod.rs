pub mod code;
pub mod http_action;
pub mod llm;

use std::collections::HashMap;

use serde_json::Value;

use crate::config::Config;
use crate::error::ExecutorError;
use crate::models::{Node, Workflow};
use crate::state::AppState;

/// Everything a `NodeExecutor` needs beyond its own node and input (spec.md §4.2).
pub struct ExecCtx<'a> {
    pub workflow: &'a Workflow,
    pub run_outputs: &'a HashMap<String, Value>,
    pub state: &'a AppState,
}

impl<'a> ExecCtx<'a> {
    pub fn config(&self) -> &Config {
        &self.state.config
    }
}

/// `{current_input, input_data, ...run_outputs}` — the PromptTemplater's
/// context (spec.md §4.1, §4.2), keyed by node id. `input_data` is the node's
/// raw input, JSON-serialized, so a `{{input_data}}` template binding (as used
/// by `http_action` request bodies) substitutes the same text `json.dumps`
/// would produce.
pub fn build_template_context(current_input: &Value, run_outputs: &HashMap<String, Value>) -> Value {
    let mut map = serde_json::Map::new();
    map.insert("current_input".to_string(), current_input.clone());
    map.insert(
        "input_data".to_string(),
        Value::String(serde_json::to_string(current_input).unwrap_or_else(|_| "null".into())),
    );
    for (k, v) in run_outputs {
        map.insert(k.clone(), v.clone());
    }
    Value::Object(map)
}

/// Dispatches by node `type` (spec.md §4.2). `model_config` is a configuration
/// container, never scheduled directly by the graph traversal.
pub async fn dispatch(node: &Node, input: Value, ctx: &ExecCtx<'_>) -> Result<Value, ExecutorError> {
    match node.node_type.as_str() {
        "input" | "trigger" => Ok(input),
        "webhook_trigger" | "webhook" => Ok(input),
        "default" => Ok(serde_json::json!({"logged_input_summary": input})),
        "llm" => llm::execute(node, input, ctx).await,
        "code" => code::execute(node, input, ctx).await,
        "http_action" | "webhook_action" | "api_consumer" => {
            http_action::execute(node, input, ctx).await
        }
        "model_config" => Err(ExecutorError::Validation(
            "model_config nodes are configuration-only and cannot be executed".into(),
        )),
        other => {
            tracing::warn!(node_type = other, node_id = %node.id, "unknown node type, passing input through");
            Ok(input)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(id: &str, ty: &str, data: Value) -> Node {
        Node {
            id: id.into(),
            node_type: ty.into(),
            position: Value::Null,
            data,
        }
    }

    fn workflow() -> Workflow {
        Workflow {
            id: "w".into(),
            name: "w".into(),
            nodes: vec![],
            edges: vec![],
            metadata: Value::Null,
            is_active: false,
            tested: false,
            last_tested: None,
        }
    }

    #[test]
    fn template_context_binds_input_data_as_json() {
        let outputs = HashMap::new();
        let ctx = build_template_context(&json!({"x": 1}), &outputs);
        assert_eq!(ctx.get("input_data"), Some(&Value::String("{\"x\":1}".to_string())));
    }

    #[tokio::test]
    async fn input_node_passes_through() {
        let wf = workflow();
        let outputs = HashMap::new();
        let state = crate::state::tests::build_test_state();
        let ctx = ExecCtx {
            workflow: &wf,
            run_outputs: &outputs,
            state: &state,
        };
        let n = node("a", "input", json!({}));
        let result = dispatch(&n, json!({"x": 1}), &ctx).await.unwrap();
        assert_eq!(result, json!({"x": 1}));
    }

    #[tokio::test]
    async fn default_node_wraps_input_as_logged_summary() {
        let wf = workflow();
        let outputs = HashMap::new();
        let state = crate::state::tests::build_test_state();
        let ctx = ExecCtx {
            workflow: &wf,
            run_outputs: &outputs,
            state: &state,
        };
        let n = node("b", "default", json!({}));
        let result = dispatch(&n, json!({"x": 1}), &ctx).await.unwrap();
        assert_eq!(result, json!({"logged_input_summary": {"x": 1}}));
    }

    #[tokio::test]
    async fn model_config_is_refused_if_dispatched() {
        let wf = workflow();
        let outputs = HashMap::new();
        let state = crate::state::tests::build_test_state();
        let ctx = ExecCtx {
            workflow: &wf,
            run_outputs: &outputs,
            state: &state,
        };
        let n = node("m", "model_config", json!({}));
        assert!(dispatch(&n, Value::Null, &ctx).await.is_err());
    }

    #[tokio::test]
    async fn unknown_type_passes_through_with_warning() {
        let wf = workflow();
        let outputs = HashMap::new();
        let state = crate::state::tests::build_test_state();
        let ctx = ExecCtx {
            workflow: &wf,
            run_outputs: &outputs,
            state: &state,
        };
        let n = node("z", "mystery", json!({}));
        let result = dispatch(&n, json!(42), &ctx).await.unwrap();
        assert_eq!(result, json!(42));
    }
}
