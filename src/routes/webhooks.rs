use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::responses::JsonResponse;
use crate::state::AppState;
use crate::webhooks::ingress as webhook_ingress;

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub workflow_id: String,
    pub node_id: String,
}

pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Response {
    let Some(workflow) = state.store.get_workflow(&payload.workflow_id).await else {
        return JsonResponse::not_found("workflow not found").into_response();
    };
    let Some(node) = workflow.node(&payload.node_id) else {
        return JsonResponse::not_found("node not found").into_response();
    };
    if !node.is_webhook_wait() {
        return JsonResponse::bad_request("node does not accept webhooks").into_response();
    }

    match state
        .store
        .register_webhook(&payload.workflow_id, &payload.node_id)
        .await
    {
        Ok(entry) => (
            StatusCode::OK,
            Json(json!({
                "webhook_url": crate::store::file_store::webhook_path(&entry.workflow_id, &entry.node_id),
                "webhook_id": entry.webhook_id,
                "workflow_id": entry.workflow_id,
                "node_id": entry.node_id,
            })),
        )
            .into_response(),
        Err(err) => {
            tracing::error!(error = ?err, "failed to register webhook");
            JsonResponse::server_error("failed to register webhook").into_response()
        }
    }
}

pub async fn registry(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.store.list_webhook_registry().await)
}

pub async fn get_payloads(
    State(state): State<AppState>,
    Path(segment): Path<String>,
) -> impl IntoResponse {
    let path = format!("/api/webhooks/{segment}");
    Json(state.store.list_webhook_payloads(&path).await)
}

pub async fn clear_payloads(
    State(state): State<AppState>,
    Path(segment): Path<String>,
) -> impl IntoResponse {
    let path = format!("/api/webhooks/{segment}");
    state.store.clear_webhook_payloads(&path).await;
    JsonResponse::success("payloads cleared")
}

/// Ingress entrypoint for `ANY /api/webhooks/{segment...}` (spec.md §4.4).
pub async fn ingress(
    State(state): State<AppState>,
    Path(segment): Path<String>,
    method: axum::http::Method,
    headers: HeaderMap,
    uri: axum::http::Uri,
    body: Bytes,
) -> Response {
    let query_string = uri.query().unwrap_or("");
    let payload_data = webhook_ingress::parse_body(method.as_str(), &body, query_string);

    let header_map: serde_json::Map<String, Value> = headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                Value::String(value.to_str().unwrap_or("").to_string()),
            )
        })
        .collect();
    let mut query_map = serde_json::Map::new();
    for pair in query_string.split('&').filter(|p| !p.is_empty()) {
        let mut parts = pair.splitn(2, '=');
        if let Some(k) = parts.next() {
            let v = parts.next().unwrap_or("");
            if let (Ok(k), Ok(v)) = (urlencoding::decode(k), urlencoding::decode(v)) {
                query_map.insert(k.into_owned(), Value::String(v.into_owned()));
            }
        }
    }

    let outcome = webhook_ingress::handle(
        &std::sync::Arc::new(state),
        &segment,
        method.as_str(),
        payload_data,
        Value::Object(header_map),
        Value::Object(query_map),
    )
    .await;

    let status = if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    (status, Json(outcome)).into_response()
}
