pub mod node;
pub mod webhooks;
pub mod workflows;

use axum::{
    routing::{any, get, post},
    Router,
};

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(node::healthz))
        .route("/api/node/code/test", post(node::test_code))
        .route("/api/workflows", post(workflows::create_workflow).get(workflows::list_workflows))
        .route("/api/workflows/import_single", post(workflows::import_single))
        .route("/api/workflows/{id}", get(workflows::get_workflow))
        .route("/api/workflows/{id}/run", post(workflows::start_run))
        .route("/api/workflows/{id}/test", post(workflows::start_test))
        .route("/api/workflows/{id}/toggle_active", post(workflows::toggle_active))
        .route("/api/workflows/{id}/runs", get(workflows::list_runs))
        .route("/api/workflows/{id}/runs/{run_id}", get(workflows::get_run))
        .route(
            "/api/workflows/{id}/runs/{run_id}/stream",
            get(workflows::stream_run),
        )
        .route("/api/webhooks/register", post(webhooks::register))
        .route("/api/webhooks/registry", get(webhooks::registry))
        .route(
            "/api/webhooks/{segment}/payloads",
            get(webhooks::get_payloads).delete(webhooks::clear_payloads),
        )
        .route("/api/webhooks/{*segment}", any(webhooks::ingress))
        .with_state(state)
}
