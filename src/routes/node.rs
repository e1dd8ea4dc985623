use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::sandbox;
use crate::state::AppState;

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "ok"})))
}

#[derive(Deserialize)]
pub struct TestCodeRequest {
    pub code: String,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

/// Lets the editor run a `code` node's source in isolation, outside of any
/// workflow run (spec.md §4.3).
pub async fn test_code(
    State(_state): State<AppState>,
    Json(payload): Json<TestCodeRequest>,
) -> impl IntoResponse {
    let timeout = payload
        .timeout_seconds
        .map(Duration::from_secs)
        .unwrap_or(sandbox::DEFAULT_TIMEOUT);

    let result = sandbox::execute(payload.code, payload.input, timeout).await;
    (StatusCode::OK, Json(result))
}
