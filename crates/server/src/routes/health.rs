use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use ratekeeper_store::BackendKind;

use crate::state::SharedState;

/// GET /api/health
///
/// Store reachability (a live ping) plus which backend is serving and the
/// most recent store failure, if any.
pub async fn health_check(State(state): State<SharedState>) -> Json<Value> {
    let connected = state.store.ping().await.is_ok();
    let backend = state.store.backend();
    let status = if connected { "healthy" } else { "degraded" };

    Json(json!({
        "status": status,
        "redis": {
            "connected": connected,
            "is_fakeredis": backend == BackendKind::Memory,
            "type": backend.as_str(),
        },
        "last_store_error": state.last_store_error(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
