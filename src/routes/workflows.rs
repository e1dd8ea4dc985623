use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::engine::scheduler;
use crate::models::{LogEvent, LogStatus, Workflow};
use crate::responses::JsonResponse;
use crate::state::AppState;
use crate::streaming::StreamHub;

pub async fn create_workflow(
    State(state): State<AppState>,
    Json(workflow): Json<Workflow>,
) -> Response {
    match state.store.save_workflow(workflow).await {
        Ok(saved) => (
            StatusCode::CREATED,
            Json(json!({"workflow_id": saved.id, "workflow": saved})),
        )
            .into_response(),
        Err(err) => {
            tracing::error!(error = ?err, "failed to save workflow");
            JsonResponse::server_error("failed to save workflow").into_response()
        }
    }
}

/// Same upsert semantics as [`create_workflow`], for editors that import a
/// full workflow document (spec.md §6).
pub async fn import_single(
    State(state): State<AppState>,
    Json(workflow): Json<Workflow>,
) -> Response {
    create_workflow(State(state), Json(workflow)).await
}

pub async fn get_workflow(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.store.get_workflow(&id).await {
        Some(workflow) => (StatusCode::OK, Json(workflow)).into_response(),
        None => JsonResponse::not_found("workflow not found").into_response(),
    }
}

pub async fn list_workflows(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.store.list_workflows().await)
}

async fn start(state: AppState, id: String, is_test: bool) -> Response {
    let Some(workflow) = state.store.get_workflow(&id).await else {
        return JsonResponse::not_found("workflow not found").into_response();
    };
    let run_id = scheduler::start(std::sync::Arc::new(state), workflow, is_test, Value::Null);
    (
        StatusCode::ACCEPTED,
        Json(json!({"run_id": run_id, "workflow_id": id})),
    )
        .into_response()
}

pub async fn start_run(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    start(state, id, false).await
}

pub async fn start_test(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    start(state, id, true).await
}

#[derive(Deserialize)]
pub struct ToggleActiveRequest {
    pub active: bool,
}

/// `is_active` may only be set when `tested` is already true (spec.md §8
/// invariant 3).
pub async fn toggle_active(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ToggleActiveRequest>,
) -> Response {
    let Some(workflow) = state.store.get_workflow(&id).await else {
        return JsonResponse::not_found("workflow not found").into_response();
    };
    if body.active && !workflow.tested {
        return JsonResponse::bad_request("workflow must pass a test run before activation")
            .into_response();
    }
    match state.store.set_active(&id, body.active).await {
        Ok(true) => (StatusCode::OK, Json(json!({"active": body.active}))).into_response(),
        Ok(false) => JsonResponse::not_found("workflow not found").into_response(),
        Err(err) => {
            tracing::error!(error = ?err, "failed to toggle active");
            JsonResponse::server_error("failed to update workflow").into_response()
        }
    }
}

#[derive(Deserialize)]
pub struct ListRunsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    10
}

pub async fn list_runs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<ListRunsQuery>,
) -> impl IntoResponse {
    Json(state.store.list_runs(&id, params.limit).await)
}

pub async fn get_run(
    State(state): State<AppState>,
    Path((workflow_id, run_id)): Path<(String, Uuid)>,
) -> Response {
    match state.store.get_run(&workflow_id, run_id).await {
        Some(run) => (StatusCode::OK, Json(run)).into_response(),
        None => JsonResponse::not_found("run not found").into_response(),
    }
}

/// Drops the channel when the SSE future is dropped, whether that happens
/// because the client disconnected mid-stream or because the loop below ran
/// to completion — the scheduler's `stream_hub.exists` check (spec.md §4.1
/// step 1) only observes a disconnect if removal happens exactly here, not
/// after an `.await` the disconnect itself prevents from ever resuming.
struct RemoveOnDrop {
    hub: Arc<StreamHub>,
    run_id: Uuid,
}

impl Drop for RemoveOnDrop {
    fn drop(&mut self) {
        self.hub.remove(self.run_id);
    }
}

/// Drains the run's StreamHub channel as an SSE stream, terminating once the
/// `__END__` sentinel is seen or the client disconnects (spec.md §4.5).
pub async fn stream_run(
    State(state): State<AppState>,
    Path((_workflow_id, run_id)): Path<(String, Uuid)>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.stream_hub.take_receiver(run_id);
    let hub = state.stream_hub.clone();

    let s = stream! {
        let Some(mut rx) = rx else {
            let unavailable = LogEvent::new(run_id, "Stream Unavailable", LogStatus::Failed, false)
                .with_error("Log stream unavailable or run already completed");
            yield Ok::<Event, Infallible>(Event::default().json_data(&unavailable).unwrap());
            return;
        };

        let _guard = RemoveOnDrop { hub, run_id };

        while let Some(event) = rx.recv().await {
            let is_end = event.is_end();
            let ev = Event::default().json_data(&event).unwrap();
            yield Ok::<Event, Infallible>(ev);
            if is_end {
                break;
            }
        }
    };

    Sse::new(s).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(10))
            .text("keepalive"),
    )
}
