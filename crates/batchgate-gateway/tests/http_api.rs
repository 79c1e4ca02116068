//! HTTP surface driven through the axum router without a socket.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use batchgate_gateway::{app_state::AppState, config, router};

const CONFIG: &str = r#"
version: 1
batching: { max_queue: 64, max_batch: 8, max_latency_ms: 1 }
default_policy: { rate: 100.0, burst: 100, timeout_ms: 2000 }
tenants:
  - { id: acme, rate: 100.0, burst: 100, timeout_ms: 2000 }
agents:
  - { slug: retriever, max_batch: 4 }
  - { slug: ranker }
autostart:
  - { slug: ranker, name_prefix: boot, copies: 1 }
"#;

fn app() -> (AppState, Router) {
    let cfg = config::load_from_str(CONFIG).unwrap();
    let state = AppState::new(cfg).unwrap();
    state.autostart().unwrap();
    let router = router::build_router(state.clone());
    (state, router)
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let req = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(v) => req
            .header("content-type", "application/json")
            .body(Body::from(v.to_string()))
            .unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn query_defaults_to_direct_provider() {
    let (_, app) = app();
    let (status, body) = call(&app, Method::POST, "/v1/query", Some(json!({ "payload": { "q": "hi" } }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["target"], "direct");
    assert_eq!(body["output"]["echo"]["q"], "hi");
    assert_eq!(body["output"]["batch_size"], 1);
}

#[tokio::test]
async fn unknown_target_is_404() {
    let (_, app) = app();
    let (status, body) = call(
        &app,
        Method::POST,
        "/v1/query",
        Some(json!({ "target": "ghost", "payload": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
    assert!(body["msg"].as_str().unwrap().contains("ghost"));
}

#[tokio::test]
async fn malformed_body_is_400() {
    let (_, app) = app();
    let (status, body) = call(&app, Method::POST, "/v1/query", Some(json!({ "tenant": "acme" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");

    let (status, _) = call(
        &app,
        Method::POST,
        "/v1/query",
        Some(json!({ "payload": 1, "timeout_ms": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn agent_lifecycle() {
    let (state, app) = app();

    let (status, body) = call(
        &app,
        Method::POST,
        "/v1/agents/bulk",
        Some(json!({ "agent_slugs": ["retriever"], "name_prefix": "s1", "copies": 2, "tenant": "acme" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let started = body["started"].as_array().unwrap();
    assert_eq!(started.len(), 2);
    assert_eq!(started[0]["task_id"], "s1-retriever-0");
    assert_eq!(started[0]["name"], "s1-retriever-0");
    assert_eq!(started[1]["agent"], "retriever");
    assert_eq!(started[1]["ready"], true);
    assert!(started[1]["created_at"].as_f64().unwrap() > 0.0);

    let (_, body) = call(&app, Method::GET, "/v1/agents/status", None).await;
    // Two started here plus the autostarted one.
    assert_eq!(body["agents"].as_array().unwrap().len(), 3);

    let (status, body) = call(&app, Method::GET, "/v1/agents/ready?task_id=s1-retriever-1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], true);

    let (status, body) = call(
        &app,
        Method::POST,
        "/v1/query",
        Some(json!({ "tenant": "acme", "target": "s1-retriever-0", "payload": "q" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["target"], "s1-retriever-0");
    assert_eq!(body["output"]["echo"], "q");

    let (status, _) = call(&app, Method::DELETE, "/v1/agents/s1-retriever-0", None).await;
    assert_eq!(status, StatusCode::OK);
    // Unknown ids report not-ready so pollers can keep polling.
    let (status, body) = call(&app, Method::GET, "/v1/agents/ready?task_id=s1-retriever-0", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "task_id": "s1-retriever-0", "ready": false }));

    let (status, body) = call(&app, Method::GET, "/v1/agents/ready?task_id=direct", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], false);

    // The default direct provider cannot be deleted as an agent.
    let (status, _) = call(&app, Method::DELETE, "/v1/agents/direct", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    state.shutdown().await;
}

#[tokio::test]
async fn bulk_start_unknown_slug_starts_nothing() {
    let (state, app) = app();
    let (status, body) = call(
        &app,
        Method::POST,
        "/v1/agents/bulk",
        Some(json!({ "agent_slugs": ["retriever", "ghost"], "name_prefix": "x" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
    assert_eq!(state.registry().agents().len(), 1);

    let (status, _) = call(
        &app,
        Method::POST,
        "/v1/agents/bulk",
        Some(json!({ "agent_slugs": ["retriever"], "name_prefix": "x", "copies": 65 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    state.shutdown().await;
}

#[tokio::test]
async fn tenant_policy_update_rate_limits_agents() {
    let (state, app) = app();
    let (status, body) = call(
        &app,
        Method::PUT,
        "/v1/tenants/tight/policy",
        Some(json!({ "rate": 1.0, "burst": 1, "timeout_ms": 1000 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["applied"], 1);

    let query = json!({ "tenant": "tight", "target": "boot-ranker-0", "payload": 1 });
    let (status, _) = call(&app, Method::POST, "/v1/query", Some(query.clone())).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = call(&app, Method::POST, "/v1/query", Some(query)).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["code"], "RATE_LIMITED");

    let (status, body) = call(
        &app,
        Method::PUT,
        "/v1/tenants/tight/policy",
        Some(json!({ "rate": 0.0, "burst": 1, "timeout_ms": 1000 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
    state.shutdown().await;
}

#[tokio::test]
async fn telemetry_lists_every_target() {
    let (state, app) = app();
    call(
        &app,
        Method::POST,
        "/v1/query",
        Some(json!({ "target": "boot-ranker-0", "payload": 1 })),
    )
    .await;

    let (status, body) = call(&app, Method::GET, "/v1/telemetry/batching", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["draining"], false);
    assert_eq!(body["targets"]["direct"]["kind"], "direct");
    let agent = &body["targets"]["boot-ranker-0"];
    assert_eq!(agent["kind"], "agent");
    assert_eq!(agent["pipeline"]["batcher"]["requests_batched"], 1);
    assert_eq!(agent["pipeline"]["gatekeeper"]["admitted"], 1);
    state.shutdown().await;
}

#[tokio::test]
async fn ops_endpoints_and_draining() {
    let (state, app) = app();

    let resp = app
        .clone()
        .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let (status, body) = call(&app, Method::GET, "/readyz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["agents"], 1);
    assert_eq!(body["agents_ready"], 1);

    let resp = app
        .clone()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let text = String::from_utf8(to_bytes(resp.into_body(), usize::MAX).await.unwrap().to_vec()).unwrap();
    assert!(text.contains("batchgate_targets 2"));
    assert!(text.contains("batchgate_queue_depth{target=\"boot-ranker-0\"} 0"));
    assert!(text.contains("batchgate_draining 0"));

    state.shutdown().await;

    let (status, body) = call(&app, Method::GET, "/readyz", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "draining");
    assert_eq!(body["agents_ready"], 0);

    let (status, body) = call(&app, Method::POST, "/v1/query", Some(json!({ "payload": 1 }))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "UNAVAILABLE");
}
