use std::time::Duration;

use serde_json::Value;

use crate::error::ExecutorError;
use crate::models::Node;
use crate::sandbox::{self, DEFAULT_TIMEOUT};

use super::ExecCtx;

/// Runs `node.data.params.code`'s `execute(input)` through the Sandbox
/// (spec.md §4.2 "code").
pub async fn execute(node: &Node, input: Value, _ctx: &ExecCtx<'_>) -> Result<Value, ExecutorError> {
    let params = node.data.get("params").cloned().unwrap_or(Value::Null);
    let source = params
        .get("code")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ExecutorError::Validation("code node requires a `code` source".into()))?
        .to_string();

    let timeout = params
        .get("timeout_seconds")
        .and_then(|v| v.as_u64())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_TIMEOUT);

    let result = sandbox::execute(source, input, timeout).await;
    if result.is_success() {
        Ok(result.result.unwrap_or(Value::Null))
    } else {
        Err(ExecutorError::Sandbox(
            result.error.unwrap_or_else(|| "sandbox execution failed".into()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn empty_workflow() -> crate::models::Workflow {
        crate::models::Workflow {
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

    #[tokio::test]
    async fn successful_code_node_returns_result() {
        let state = crate::state::tests::build_test_state();
        let workflow = empty_workflow();
        let run_outputs = std::collections::HashMap::new();
        let ctx = ExecCtx {
            workflow: &workflow,
            run_outputs: &run_outputs,
            state: &state,
        };
        let node = Node {
            id: "c".into(),
            node_type: "code".into(),
            position: Value::Null,
            data: json!({"params": {"code": "return {sum: input.a + input.b};"}}),
        };
        let result = execute(&node, json!({"a": 2, "b": 3}), &ctx).await.unwrap();
        assert_eq!(result, json!({"sum": 5}));
    }

    #[tokio::test]
    async fn missing_code_source_is_a_validation_error() {
        let state = crate::state::tests::build_test_state();
        let workflow = empty_workflow();
        let run_outputs = std::collections::HashMap::new();
        let ctx = ExecCtx {
            workflow: &workflow,
            run_outputs: &run_outputs,
            state: &state,
        };
        let node = Node {
            id: "c".into(),
            node_type: "code".into(),
            position: Value::Null,
            data: json!({"params": {}}),
        };
        let err = execute(&node, Value::Null, &ctx).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Validation(_)));
    }
}
