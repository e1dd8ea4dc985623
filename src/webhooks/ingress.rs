use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;

use crate::engine::scheduler;
use crate::models::{WebhookPayload, WebhookRegistryEntry};
use crate::state::AppState;
use crate::store::file_store::webhook_path;

/// Result of a single ingress request (spec.md §4.4).
#[derive(Debug, Clone, Serialize)]
pub struct IngressOutcome {
    pub success: bool,
    pub message: String,
}

impl IngressOutcome {
    fn ok(message: impl Into<String>) -> Self {
        IngressOutcome {
            success: true,
            message: message.into(),
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        IngressOutcome {
            success: false,
            message: message.into(),
        }
    }
}

/// The single handler bound to `/api/webhooks/{segment...}` (spec.md §4.4).
/// `segment` is the path tail with the leading `/api/webhooks/` stripped.
pub async fn handle(
    state: &Arc<AppState>,
    segment: &str,
    method: &str,
    payload_data: Value,
    headers: Value,
    query_params: Value,
) -> IngressOutcome {
    let full_path = format!("/api/webhooks/{segment}");

    state
        .store
        .append_webhook_payload(
            &full_path,
            WebhookPayload {
                data: payload_data.clone(),
                headers,
                method: method.to_string(),
                query_params,
                timestamp: OffsetDateTime::now_utc(),
            },
        )
        .await;

    // Step 4: test rendezvous priority. Removal from `active_waiters`
    // precedes signaling (enforced inside `RendezvousTable::signal`).
    if let Some(run_id) = state.rendezvous.run_id_for_path(&full_path) {
        if let Some((_, node_id)) = parse_segment(segment) {
            if state
                .rendezvous
                .signal(&full_path, run_id, &node_id, payload_data.clone())
            {
                return IngressOutcome::ok("test data received");
            }
        }
    }

    // Step 5: registered dispatch.
    if let Some(entry) = state.store.lookup_webhook(&full_path).await {
        dispatch_registered(state, entry, payload_data).await;
        return IngressOutcome::ok("webhook received");
    }

    // Step 6: auto-registration.
    if let Some(rest) = segment.strip_prefix("wh_") {
        let (workflow_id, node_id) = split_workflow_node(rest);
        if let Some(workflow) = state.store.get_workflow(&workflow_id).await {
            if let Some(node) = workflow.node(&node_id) {
                if node.is_webhook_wait() {
                    if let Ok(entry) = state.store.register_webhook(&workflow_id, &node_id).await {
                        dispatch_registered(state, entry, payload_data).await;
                        return IngressOutcome::ok("webhook auto-registered");
                    }
                }
            }
        }
    }

    // Step 7: refused, payload already retained in the ring above.
    IngressOutcome::fail("no matching webhook registration")
}

async fn dispatch_registered(state: &Arc<AppState>, entry: WebhookRegistryEntry, payload_data: Value) {
    let path = webhook_path(&entry.workflow_id, &entry.node_id);
    if let Some(run_id) = state.rendezvous.run_id_for_path(&path) {
        state.rendezvous.signal(&path, run_id, &entry.node_id, payload_data);
        return;
    }
    let Some(workflow) = state.store.get_workflow(&entry.workflow_id).await else {
        return;
    };
    if !workflow.is_active {
        return;
    }
    scheduler::start(state.clone(), workflow, false, payload_data);
}

fn parse_segment(segment: &str) -> Option<(String, String)> {
    let rest = segment.strip_prefix("wh_")?;
    Some(split_workflow_node(rest))
}

/// Splits `segment[3:]` (the `wh_` prefix already stripped) into
/// `(workflow_id, node_id)` at the rightmost `_`, with the `dndnode`
/// corrective re-split described in spec.md §9 / SPEC_FULL.md §4.4.
fn split_workflow_node(rest: &str) -> (String, String) {
    let Some(idx) = rest.rfind('_') else {
        return (rest.to_string(), String::new());
    };
    let prefix = &rest[..idx];
    let tail = &rest[idx + 1..];

    if !tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit()) && prefix.ends_with("dndnode") {
        let dnd_start = idx - "dndnode".len();
        let workflow_id = rest[..dnd_start].trim_end_matches('_').to_string();
        let node_id = rest[dnd_start..].to_string();
        return (workflow_id, node_id);
    }

    (prefix.to_string(), tail.to_string())
}

/// Body parsing fallback chain (spec.md §4.4 step 1): JSON, then
/// form-encoded, then raw bytes wrapped as `{raw: ...}`. GET requests use the
/// query string as the payload.
pub fn parse_body(method: &str, raw: &[u8], query_string: &str) -> Value {
    if method.eq_ignore_ascii_case("GET") {
        return parse_query_string(query_string);
    }
    if let Ok(v) = serde_json::from_slice::<Value>(raw) {
        return v;
    }
    if let Ok(text) = std::str::from_utf8(raw) {
        if let Some(form) = try_parse_form(text) {
            return form;
        }
    }
    serde_json::json!({ "raw": String::from_utf8_lossy(raw).to_string() })
}

fn parse_query_string(qs: &str) -> Value {
    try_parse_form(qs).unwrap_or_else(|| Value::Object(Default::default()))
}

fn try_parse_form(text: &str) -> Option<Value> {
    if text.is_empty() || !text.contains('=') {
        return None;
    }
    let mut map = serde_json::Map::new();
    for pair in text.split('&') {
        if pair.is_empty() {
            continue;
        }
        let mut parts = pair.splitn(2, '=');
        let k = parts.next()?;
        let v = parts.next().unwrap_or("");
        let k = urlencoding::decode(k).ok()?.into_owned();
        let v = urlencoding::decode(v).ok()?.into_owned();
        map.insert(k, Value::String(v));
    }
    if map.is_empty() {
        None
    } else {
        Some(Value::Object(map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_segment_splits_at_rightmost_underscore() {
        assert_eq!(
            split_workflow_node("wf_node1"),
            ("wf".to_string(), "node1".to_string())
        );
    }

    #[test]
    fn dndnode_tail_is_kept_intact() {
        assert_eq!(
            split_workflow_node("wf_123_dndnode_5"),
            ("wf_123".to_string(), "dndnode_5".to_string())
        );
    }

    #[test]
    fn numeric_tail_without_dndnode_prefix_splits_normally() {
        assert_eq!(
            split_workflow_node("wf_123_7"),
            ("wf_123".to_string(), "7".to_string())
        );
    }

    #[test]
    fn json_body_is_preferred() {
        let body = br#"{"a":1}"#;
        assert_eq!(parse_body("POST", body, ""), json!({"a": 1}));
    }

    #[test]
    fn form_body_falls_back_from_invalid_json() {
        let body = b"a=1&b=two";
        assert_eq!(parse_body("POST", body, ""), json!({"a": "1", "b": "two"}));
    }

    #[test]
    fn raw_body_is_wrapped_when_unparseable() {
        let body = b"not json or form";
        let result = parse_body("POST", body, "");
        assert_eq!(result["raw"], json!("not json or form"));
    }

    #[test]
    fn get_uses_query_string() {
        let result = parse_body("GET", b"", "x=1&y=2");
        assert_eq!(result, json!({"x": "1", "y": "2"}));
    }
}
