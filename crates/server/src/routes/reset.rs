use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use tracing::info;

use ratekeeper_common::RateKeeperResult;
use ratekeeper_limiter::keys;

use crate::state::SharedState;

/// POST /api/reset
///
/// Wipe every rate-limit namespace: per-identity state, the leaky-bucket
/// registry, and the global counters. The persisted configuration is
/// re-seeded from the startup defaults afterwards, which makes a second
/// reset a no-op.
pub async fn reset(State(state): State<SharedState>) -> impl IntoResponse {
    match wipe(&state).await {
        Ok(removed) => {
            info!(removed, "rate limiter state reset");
            (
                StatusCode::OK,
                Json(json!({ "status": "reset", "keys_removed": removed })),
            )
        }
        Err(err) => {
            state.note_store_error(&err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "detail": format!("reset failed: {err}") })),
            )
        }
    }
}

async fn wipe(state: &SharedState) -> RateKeeperResult<u64> {
    let store = &state.store;
    let mut removed: u64 = 0;
    for pattern in [keys::RATELIMIT_PATTERN, keys::LEAKY_BUCKET_PATTERN] {
        for key in store.keys(pattern).await? {
            store.del(&key).await?;
            removed += 1;
        }
    }
    for key in [
        keys::ACTIVE_LEAKY_BUCKETS,
        keys::TOTAL_REQUESTS,
        keys::TOTAL_429S,
        keys::ACTIVE_IPS,
        keys::CONFIG,
    ] {
        store.del(key).await?;
    }
    state.registry.reset_to_defaults().await?;
    Ok(removed)
}
