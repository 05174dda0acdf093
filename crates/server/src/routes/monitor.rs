use axum::extract::State;
use axum::Json;
use serde_json::{json, Map, Value};
use tracing::debug;

use ratekeeper_limiter::{keys, Algorithm};

use crate::state::SharedState;

/// GET /api/monitor
///
/// Global counters plus a per-algorithm view of how much state the store
/// currently tracks. Introspection is best-effort: a store hiccup yields
/// zeros rather than an error, since this endpoint backs a dashboard.
pub async fn get_monitor(State(state): State<SharedState>) -> Json<Value> {
    let global = match state.recorder.snapshot().await {
        Ok(snapshot) => snapshot,
        Err(err) => {
            debug!(error = %err, "monitor could not read global counters");
            state.note_store_error(&err);
            Default::default()
        }
    };

    let mut algorithm_data = Map::new();
    for algorithm in Algorithm::ALL {
        algorithm_data.insert(
            algorithm.as_str().to_string(),
            algorithm_snapshot(&state, algorithm).await,
        );
    }

    Json(json!({
        "globalMetrics": {
            "totalRequests": global.total_requests,
            "total429s": global.total_429s,
            "activeIPs": global.active_ips,
        },
        "algorithmData": Value::Object(algorithm_data),
    }))
}

async fn algorithm_snapshot(state: &SharedState, algorithm: Algorithm) -> Value {
    match algorithm {
        Algorithm::LeakyBucket => {
            let active = state
                .store
                .smembers(keys::ACTIVE_LEAKY_BUCKETS)
                .await
                .unwrap_or_default();
            let mut queued_total: u64 = 0;
            for identity in &active {
                queued_total += state
                    .store
                    .llen(&keys::leaky_bucket(identity))
                    .await
                    .unwrap_or(0);
            }
            json!({
                "active_buckets": active.len(),
                "queued_total": queued_total,
            })
        }
        other => {
            let tracked = state
                .store
                .keys(&keys::algorithm_pattern(other))
                .await
                .map(|keys| keys.len())
                .unwrap_or(0);
            json!({ "tracked_keys": tracked })
        }
    }
}
