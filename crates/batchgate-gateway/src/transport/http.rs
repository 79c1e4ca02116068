//! JSON HTTP handlers for queries, agent management and telemetry.
//!
//! Every failure leaves through [`ApiError`], which owns the mapping from
//! `BatchGateError` to status code and `{"code","msg"}` body.

use std::time::Duration;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use batchgate_core::error::{BatchGateError, ClientCode, Result};

use crate::app_state::AppState;
use crate::config::schema::default_tenant;
use crate::dispatch::QueryTarget;
use crate::policy::TenantPolicy;

// --------------------
// Error mapping
// --------------------
#[derive(Debug)]
pub struct ApiError(pub BatchGateError);

impl From<BatchGateError> for ApiError {
    fn from(e: BatchGateError) -> Self {
        Self(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        Self(BatchGateError::BadRequest(e.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(e: QueryRejection) -> Self {
        Self(BatchGateError::BadRequest(e.body_text()))
    }
}

pub fn status_for(e: &BatchGateError) -> StatusCode {
    match e {
        BatchGateError::RateLimited | BatchGateError::QueueFull => StatusCode::TOO_MANY_REQUESTS,
        BatchGateError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        BatchGateError::Backend(_) => StatusCode::BAD_GATEWAY,
        BatchGateError::BadRequest(_) | BatchGateError::UnsupportedVersion => StatusCode::BAD_REQUEST,
        BatchGateError::NotFound(_) => StatusCode::NOT_FOUND,
        BatchGateError::Closed => StatusCode::SERVICE_UNAVAILABLE,
        BatchGateError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: ClientCode,
    pub msg: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        // Load shedding and drain rejections are expected traffic.
        if self.0.is_rejection() || !status.is_server_error() {
            tracing::debug!(error = %self.0, %status, "request rejected");
        } else {
            tracing::warn!(error = %self.0, %status, "request failed");
        }
        let body = ErrorBody {
            code: self.0.client_code(),
            msg: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

fn timeout_from_ms(ms: Option<u64>) -> Result<Option<Duration>> {
    match ms {
        Some(0) => Err(BatchGateError::BadRequest("timeout_ms must be > 0".into())),
        Some(ms) => Ok(Some(Duration::from_millis(ms))),
        None => Ok(None),
    }
}

// --------------------
// POST /v1/query
// --------------------
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryRequest {
    #[serde(default = "default_tenant")]
    pub tenant: String,
    #[serde(default)]
    pub target: Option<String>,
    pub payload: Value,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

pub async fn query(
    State(state): State<AppState>,
    body: std::result::Result<Json<QueryRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(req) = body?;
    if state.is_draining() {
        return Err(BatchGateError::Closed.into());
    }
    let timeout = timeout_from_ms(req.timeout_ms)?;
    let id = req.target.as_deref().unwrap_or_else(|| state.default_target());
    let target = state
        .registry()
        .get(id)
        .ok_or_else(|| BatchGateError::NotFound(format!("target {id}")))?;

    let output = target.submit(&req.tenant, req.payload, timeout).await?;
    Ok(Json(json!({ "target": target.id(), "output": output })))
}

// --------------------
// Agents
// --------------------
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BulkStartRequest {
    pub agent_slugs: Vec<String>,
    pub name_prefix: String,
    #[serde(default = "default_copies")]
    pub copies: usize,
    #[serde(default = "default_tenant")]
    pub tenant: String,
}

fn default_copies() -> usize {
    1
}

pub async fn start_agents(
    State(state): State<AppState>,
    body: std::result::Result<Json<BulkStartRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(req) = body?;
    if req.agent_slugs.is_empty() {
        return Err(BatchGateError::BadRequest("agent_slugs must not be empty".into()).into());
    }
    let reg = state.registry();
    // Reject unknown slugs before starting anything.
    if let Some(slug) = req
        .agent_slugs
        .iter()
        .find(|s| reg.catalog().batcher_config(s.as_str()).is_none())
    {
        return Err(BatchGateError::NotFound(format!("unknown agent slug: {slug}")).into());
    }

    let mut started = Vec::new();
    for slug in &req.agent_slugs {
        for agent in reg.start_agents(slug, &req.name_prefix, req.copies, &req.tenant)? {
            started.push(agent.status());
        }
    }
    Ok(Json(json!({ "started": started })))
}

pub async fn agents_status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "agents": state.registry().agents() }))
}

#[derive(Debug, Deserialize)]
pub struct ReadyQuery {
    pub task_id: String,
}

/// Unknown ids answer `ready: false` rather than 404 so pollers keep polling.
pub async fn agent_ready(
    State(state): State<AppState>,
    q: std::result::Result<Query<ReadyQuery>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Query(q) = q?;
    let ready = match state.registry().get(&q.task_id) {
        Some(QueryTarget::Agent(a)) => a.is_ready(),
        _ => false,
    };
    Ok(Json(json!({ "task_id": q.task_id, "ready": ready })))
}

pub async fn delete_agent(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<Value>> {
    // Direct providers are configured, not managed over HTTP.
    match state.registry().get(&task_id) {
        Some(QueryTarget::Agent(_)) => {}
        _ => return Err(BatchGateError::NotFound(format!("agent {task_id}")).into()),
    }
    state.registry().remove(&task_id).await?;
    Ok(Json(json!({ "task_id": task_id, "removed": true })))
}

// --------------------
// PUT /v1/tenants/:tenant/policy
// --------------------
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyRequest {
    pub rate: f64,
    pub burst: u32,
    pub timeout_ms: u64,
}

pub async fn set_tenant_policy(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    body: std::result::Result<Json<PolicyRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(req) = body?;
    let policy = TenantPolicy::new(req.rate, req.burst, Duration::from_millis(req.timeout_ms))?;
    let applied = state.registry().set_policy_all(&tenant, policy)?;
    tracing::info!(%tenant, rate = req.rate, burst = req.burst, applied, "tenant policy updated");
    Ok(Json(json!({ "tenant": tenant, "applied": applied })))
}

// --------------------
// GET /v1/telemetry/batching
// --------------------
pub async fn batching_telemetry(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "draining": state.is_draining(),
        "targets": state.registry().stats(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_is_stable() {
        assert_eq!(status_for(&BatchGateError::RateLimited), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(status_for(&BatchGateError::QueueFull), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(status_for(&BatchGateError::Timeout), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(status_for(&BatchGateError::Backend("x".into())), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for(&BatchGateError::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&BatchGateError::Closed), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            status_for(&BatchGateError::Internal("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn error_body_carries_stable_code() {
        let resp = ApiError(BatchGateError::QueueFull).into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], "QUEUE_FULL");
        assert_eq!(body["code"], BatchGateError::QueueFull.client_code().as_str());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        assert!(timeout_from_ms(Some(0)).is_err());
        assert_eq!(timeout_from_ms(None).unwrap(), None);
        assert_eq!(timeout_from_ms(Some(5)).unwrap(), Some(Duration::from_millis(5)));
    }
}
