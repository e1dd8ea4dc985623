use serde_json::{json, Value};

use crate::engine::templating::templ_str;
use crate::error::ExecutorError;
use crate::models::Node;

use super::{build_template_context, ExecCtx};

/// Resolves model/credentials, renders the prompt, and sends a two-message
/// chat request to an OpenAI-compatible `/chat/completions` endpoint
/// (spec.md §4.2 "llm").
pub async fn execute(node: &Node, input: Value, ctx: &ExecCtx<'_>) -> Result<Value, ExecutorError> {
    let params = node.data.get("params").cloned().unwrap_or(Value::Null);

    let model_config_data = params
        .get("model_config_id")
        .and_then(|v| v.as_str())
        .and_then(|id| ctx.workflow.node(id))
        .map(|n| n.data.clone());

    let resolve = |key: &str| -> Option<String> {
        model_config_data
            .as_ref()
            .and_then(|cfg| cfg.get(key))
            .and_then(|v| v.as_str())
            .or_else(|| params.get(key).and_then(|v| v.as_str()))
            .map(str::to_string)
    };

    let model = resolve("model").unwrap_or_else(|| ctx.config().default_llm_model.clone());
    let api_base = resolve("api_base").unwrap_or_else(|| ctx.config().default_llm_api_base.clone());
    let api_key = resolve("api_key").or_else(|| ctx.config().llm_api_key.clone());

    let prompt_raw = params.get("prompt").and_then(|v| v.as_str()).unwrap_or("");
    let template_ctx = build_template_context(&input, ctx.run_outputs);
    let rendered_prompt = templ_str(prompt_raw, &template_ctx);

    let temperature = params
        .get("temperature")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.7);
    let max_tokens = params.get("max_tokens").and_then(|v| v.as_u64()).unwrap_or(1024);

    let user_content = format!(
        "Contextual Input: {}",
        serde_json::to_string(&input).unwrap_or_else(|_| "null".into())
    );

    let body = json!({
        "model": model,
        "temperature": temperature,
        "max_tokens": max_tokens,
        "messages": [
            {"role": "system", "content": rendered_prompt},
            {"role": "user", "content": user_content},
        ],
    });

    let url = format!("{}/chat/completions", api_base.trim_end_matches('/'));
    let mut req = ctx.state.http_client.post(&url).json(&body);
    if let Some(key) = &api_key {
        req = req.bearer_auth(key);
    }

    let resp = req
        .send()
        .await
        .map_err(|e| ExecutorError::Transport(e.to_string()))?;

    let status = resp.status();
    if status.as_u16() == 401 || status.as_u16() == 403 {
        let text = resp.text().await.unwrap_or_default();
        return Err(ExecutorError::Authentication(format!(
            "upstream rejected credentials ({status}): {text}"
        )));
    }
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(ExecutorError::Transport(format!(
            "upstream returned {status}: {text}"
        )));
    }

    let full_response: Value = resp
        .json()
        .await
        .map_err(|e| ExecutorError::Transport(format!("malformed upstream response: {e}")))?;

    let usage = full_response.get("usage").cloned().unwrap_or(Value::Null);
    Ok(json!({
        "status": "success",
        "full_response": full_response,
        "details": {"model": model, "usage": usage},
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_renders_against_template_context() {
        let ctx = build_template_context(&json!({"a": 1}), &std::collections::HashMap::new());
        let rendered = templ_str("value is {{current_input.a}}", &ctx);
        assert_eq!(rendered, "value is 1");
    }
}
