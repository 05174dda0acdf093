//! Router-level tests against the in-process store.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{Request, Response, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use ratekeeper_common::AppConfig;
use ratekeeper_limiter::{ConfigRegistry, RateLimitSettings};
use ratekeeper_server::build_router;
use ratekeeper_server::state::AppState;
use ratekeeper_store::{MemoryStore, Store};

async fn app(limit: u64, window_secs: u64) -> Router {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let mut config = AppConfig::default();
    config.rate_limit.limit = limit;
    config.rate_limit.window_secs = window_secs;
    let registry = Arc::new(
        ConfigRegistry::load(store.clone(), RateLimitSettings { limit, window_secs }).await,
    );
    let state = Arc::new(AppState::new(config, store, registry));
    build_router(state).layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))))
}

async fn get(app: &Router, uri: &str) -> Response<Body> {
    app.clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn get_forwarded(app: &Router, uri: &str, forwarded_for: &str) -> Response<Body> {
    app.clone()
        .oneshot(
            Request::builder()
                .uri(uri)
                .header("x-forwarded-for", forwarded_for)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn post_json(app: &Router, uri: &str, body: &str) -> Response<Body> {
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn json_body(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn serves_images_until_the_limit_then_429s() {
    let app = app(3, 60).await;
    for _ in 0..3 {
        let response = get(&app, "/api/image/64/64?algo=fixed_window").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"],
            "image/svg+xml",
        );
    }
    let response = get(&app, "/api/image/64/64?algo=fixed_window").await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = json_body(response).await;
    assert_eq!(body["detail"], "Rate limit exceeded. Try again later.");
}

#[tokio::test]
async fn unknown_algorithm_falls_back_to_fixed_window() {
    let app = app(1, 60).await;
    assert_eq!(
        get(&app, "/api/image/8/8?algo=definitely_not_real").await.status(),
        StatusCode::OK
    );
    // The fallback shares fixed-window state with the explicit name.
    assert_eq!(
        get(&app, "/api/image/8/8?algo=fixed_window").await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}

#[tokio::test]
async fn forwarded_for_separates_identities() {
    let app = app(1, 60).await;
    assert_eq!(
        get_forwarded(&app, "/api/image/8/8", "203.0.113.7").await.status(),
        StatusCode::OK
    );
    assert_eq!(
        get_forwarded(&app, "/api/image/8/8", "203.0.113.7").await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
    // A different forwarded client has its own budget.
    assert_eq!(
        get_forwarded(&app, "/api/image/8/8", "203.0.113.8").await.status(),
        StatusCode::OK
    );
}

#[tokio::test]
async fn malformed_forwarded_header_uses_the_peer() {
    let app = app(1, 60).await;
    assert_eq!(
        get_forwarded(&app, "/api/image/8/8", "not-an-ip").await.status(),
        StatusCode::OK
    );
    // Both requests collapse onto the peer identity.
    assert_eq!(
        get(&app, "/api/image/8/8").await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}

#[tokio::test]
async fn rejects_bad_dimensions() {
    let app = app(10, 60).await;
    assert_eq!(
        get(&app, "/api/image/0/64").await.status(),
        StatusCode::BAD_REQUEST
    );
    assert_eq!(
        get(&app, "/api/image/64/9999").await.status(),
        StatusCode::BAD_REQUEST
    );
}

#[tokio::test]
async fn every_algorithm_is_reachable() {
    let app = app(5, 60).await;
    for algo in [
        "fixed_window",
        "sliding_window_log",
        "sliding_window_counter",
        "token_bucket",
        "leaky_bucket",
    ] {
        let response = get(&app, &format!("/api/image/16/16?algo={algo}")).await;
        assert_eq!(response.status(), StatusCode::OK, "algo {algo}");
    }
}

#[tokio::test]
async fn config_updates_validate_and_apply() {
    let app = app(10, 60).await;

    let response = post_json(&app, "/api/config", r#"{"limit":0,"window":10}"#).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = post_json(&app, "/api/config", r#"{"limit":-3,"window":10}"#).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = post_json(&app, "/api/config", r#"{"limit":2,"window":10}"#).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(get(&app, "/api/config").await).await;
    assert_eq!(body["limit"], 2);
    assert_eq!(body["window"], 10);

    // The tightened limit is enforced immediately.
    assert_eq!(get(&app, "/api/image/8/8").await.status(), StatusCode::OK);
    assert_eq!(get(&app, "/api/image/8/8").await.status(), StatusCode::OK);
    assert_eq!(
        get(&app, "/api/image/8/8").await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}

#[tokio::test]
async fn reset_clears_all_state_and_is_idempotent() {
    let app = app(2, 60).await;

    // Exhaust the budget and accumulate some metrics.
    assert_eq!(get(&app, "/api/image/8/8").await.status(), StatusCode::OK);
    assert_eq!(get(&app, "/api/image/8/8").await.status(), StatusCode::OK);
    assert_eq!(
        get(&app, "/api/image/8/8").await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );

    let response = post_json(&app, "/api/reset", "").await;
    assert_eq!(response.status(), StatusCode::OK);

    // Counters read zero and the budget is fresh.
    let body = json_body(get(&app, "/api/monitor").await).await;
    assert_eq!(body["globalMetrics"]["totalRequests"], 0);
    assert_eq!(body["globalMetrics"]["total429s"], 0);
    assert_eq!(body["globalMetrics"]["activeIPs"], 0);
    assert_eq!(get(&app, "/api/image/8/8").await.status(), StatusCode::OK);

    // A second reset leaves the same clean state.
    assert_eq!(post_json(&app, "/api/reset", "").await.status(), StatusCode::OK);
    let body = json_body(get(&app, "/api/monitor").await).await;
    assert_eq!(body["globalMetrics"]["totalRequests"], 0);
    let body = json_body(get(&app, "/api/config").await).await;
    assert_eq!(body["limit"], 2);
    assert_eq!(body["window"], 60);
}

#[tokio::test]
async fn health_reports_the_memory_backend() {
    let app = app(10, 60).await;
    let body = json_body(get(&app, "/api/health").await).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["redis"]["connected"], true);
    assert_eq!(body["redis"]["is_fakeredis"], true);
    assert_eq!(body["redis"]["type"], "memory");
}

#[tokio::test]
async fn monitor_reports_global_and_per_algorithm_state() {
    let app = app(10, 60).await;
    get(&app, "/api/image/8/8?algo=token_bucket").await;
    get(&app, "/api/image/8/8?algo=leaky_bucket").await;

    let body = json_body(get(&app, "/api/monitor").await).await;
    assert_eq!(body["globalMetrics"]["totalRequests"], 2);
    assert_eq!(body["globalMetrics"]["activeIPs"], 1);

    let data = body["algorithmData"].as_object().unwrap();
    assert_eq!(data.len(), 5);
    assert_eq!(data["token_bucket"]["tracked_keys"], 1);
    assert_eq!(data["leaky_bucket"]["active_buckets"], 1);
    assert_eq!(data["leaky_bucket"]["queued_total"], 1);
}

#[tokio::test]
async fn prometheus_metrics_are_exposed() {
    let app = app(1, 60).await;
    get(&app, "/api/image/8/8").await;
    get(&app, "/api/image/8/8").await;

    let response = get(&app, "/api/metrics").await;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("ratekeeper_requests_total 2"));
    assert!(text.contains("ratekeeper_requests_rejected_total"));
}
