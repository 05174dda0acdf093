//! Token bucket.
//!
//! Capacity `limit`, refill rate `limit / window` tokens per second. The
//! stored record is `{tokens, last_refill}`; every check refills by the
//! elapsed time and then tries to consume one token. The whole
//! read-refill-take-write sequence is one atomic unit with the caller's
//! clock passed in, so admissions racing across processes settle on the
//! store's single serialized view.

use ratekeeper_store::{AtomicOp, Store, StoreResult};

use crate::{keys, RateLimitSettings};

pub(crate) async fn check_at(
    store: &dyn Store,
    identity: &str,
    settings: &RateLimitSettings,
    now: f64,
) -> StoreResult<bool> {
    let key = keys::token_bucket(identity);
    let capacity = settings.limit as f64;
    let refill_rate = capacity / settings.window_secs as f64;
    let admitted = store
        .run_atomic(AtomicOp::TokenBucketTake {
            key: &key,
            now,
            capacity,
            refill_rate,
            ttl_secs: settings.window_secs,
        })
        .await?
        == 1;
    if !admitted {
        tracing::debug!(identity, "token bucket empty");
    }
    Ok(admitted)
}
