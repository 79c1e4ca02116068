//! Axum router wiring.

use axum::{
    routing::{delete, get, post, put},
    Router,
};

use crate::{app_state::AppState, ops, transport::http};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/query", post(http::query))
        .route("/v1/agents/bulk", post(http::start_agents))
        .route("/v1/agents/status", get(http::agents_status))
        .route("/v1/agents/ready", get(http::agent_ready))
        .route("/v1/agents/:task_id", delete(http::delete_agent))
        .route("/v1/tenants/:tenant/policy", put(http::set_tenant_policy))
        .route("/v1/telemetry/batching", get(http::batching_telemetry))
        .route("/healthz", get(ops::healthz))
        .route("/readyz", get(ops::readyz))
        .route("/metrics", get(ops::metrics))
        .with_state(state)
}
