//! HTTP surface for the rate limiter.
//!
//! Routes: the rate-limited `/api/image/{w}/{h}` payload endpoint, the
//! monitoring snapshot, dynamic configuration, reset, health, and
//! Prometheus metrics. All handlers share one [`AppState`](state::AppState)
//! behind an `Arc`.

pub mod identity;
pub mod routes;
pub mod state;

use std::net::SocketAddr;

use axum::routing::{get, post};
use axum::Router;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::state::SharedState;

/// Build the Axum router with all API routes and middleware.
pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // The protected resource
        .route("/api/image/{width}/{height}", get(routes::admit::serve_image))
        // Monitoring snapshot
        .route("/api/monitor", get(routes::monitor::get_monitor))
        // Dynamic configuration
        .route(
            "/api/config",
            get(routes::config::get_config).post(routes::config::update_config),
        )
        // Full state reset
        .route("/api/reset", post(routes::reset::reset))
        // Health check
        .route("/api/health", get(routes::health::health_check))
        // Prometheus metrics
        .route("/api/metrics", get(routes::metrics::get_metrics))
        // Attach shared state and middleware
        .with_state(state)
        .layer(cors)
}

/// Serve the API until the shutdown channel fires.
pub async fn run_server(
    state: SharedState,
    listen_addr: &str,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    info!(addr = %listen_addr, "ratekeeper listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown.changed().await;
    })
    .await?;

    Ok(())
}
