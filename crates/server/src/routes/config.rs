use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use ratekeeper_common::RateKeeperError;
use ratekeeper_limiter::RateLimitSettings;

use crate::state::SharedState;

/// Signed on purpose: a negative limit must reach our validation and come
/// back as a 400, not bounce off deserialization.
#[derive(Debug, Deserialize)]
pub struct ConfigUpdate {
    pub limit: i64,
    pub window: i64,
}

/// GET /api/config
pub async fn get_config(State(state): State<SharedState>) -> impl IntoResponse {
    let settings = state.registry.current();
    Json(json!({
        "limit": settings.limit,
        "window": settings.window_secs,
    }))
}

/// POST /api/config
///
/// Validates and commits new `{limit, window}` settings, persisting them
/// to the store so every service instance picks them up.
pub async fn update_config(
    State(state): State<SharedState>,
    Json(update): Json<ConfigUpdate>,
) -> impl IntoResponse {
    if update.limit < 1 || update.window < 1 {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "detail": "limit and window must both be at least 1"
            })),
        );
    }

    let settings = RateLimitSettings {
        limit: update.limit as u64,
        window_secs: update.window as u64,
    };
    match state.registry.update(settings).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "updated",
                "limit": settings.limit,
                "window": settings.window_secs,
            })),
        ),
        Err(RateKeeperError::Config(message)) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "detail": message })),
        ),
        Err(err) => {
            state.note_store_error(&err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "detail": format!("failed to persist configuration: {err}") })),
            )
        }
    }
}
