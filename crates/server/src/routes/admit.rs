use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use ratekeeper_common::FailurePolicy;
use ratekeeper_limiter::Algorithm;

use crate::identity::client_identity;
use crate::state::SharedState;

const MAX_DIMENSION: u32 = 4096;

#[derive(Debug, Deserialize)]
pub struct AdmitQuery {
    pub algo: Option<String>,
}

/// GET /api/image/{width}/{height}
///
/// The rate-limited resource. Extracts the client identity, runs the
/// selected admission algorithm, and serves a placeholder image or a 429.
pub async fn serve_image(
    State(state): State<SharedState>,
    Path((width, height)): Path<(u32, u32)>,
    Query(query): Query<AdmitQuery>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: axum::http::HeaderMap,
) -> Response {
    if !(1..=MAX_DIMENSION).contains(&width) || !(1..=MAX_DIMENSION).contains(&height) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "detail": format!("image dimensions must be between 1 and {MAX_DIMENSION}")
            })),
        )
            .into_response();
    }

    let identity = client_identity(&headers, peer);
    state.metrics.requests_total.inc();
    state.recorder.record_request(&identity).await;

    let algorithm = Algorithm::from_query(query.algo.as_deref());
    let settings = state.registry.current();

    let admitted = match state.limiter.check(algorithm, &identity, &settings).await {
        Ok(admitted) => admitted,
        Err(err) => {
            warn!(
                identity = %identity,
                algorithm = algorithm.as_str(),
                error = %err,
                "store failure during admission check"
            );
            state.note_store_error(&err);
            // A leaky-bucket request that was never enqueued cannot be
            // admitted; everything else follows the configured policy.
            algorithm != Algorithm::LeakyBucket
                && state.config.rate_limit.failure_policy == FailurePolicy::Open
        }
    };

    if !admitted {
        state
            .metrics
            .requests_rejected
            .with_label_values(&[algorithm.as_str()])
            .inc();
        state.recorder.record_rejection().await;
        info!(identity = %identity, algorithm = algorithm.as_str(), "request rejected");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"detail": "Rate limit exceeded. Try again later."})),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "image/svg+xml")],
        placeholder_image(width, height),
    )
        .into_response()
}

/// The payload behind the limiter. A real deployment proxies to an
/// upstream producer; a self-contained placeholder keeps the admission
/// path exercisable end to end.
fn placeholder_image(width: u32, height: u32) -> String {
    format!(
        concat!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
            r#"<rect width="{w}" height="{h}" fill="gainsboro"/>"#,
            r#"<text x="50%" y="50%" dominant-baseline="middle" text-anchor="middle" "#,
            r#"font-family="monospace" fill="slategray">{w}x{h}</text>"#,
            r#"</svg>"#
        ),
        w = width,
        h = height
    )
}
