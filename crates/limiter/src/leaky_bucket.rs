//! Leaky bucket.
//!
//! The bucket is a FIFO list of admitted-but-pending timestamps, capped at
//! `limit`. Admission pushes optimistically and undoes the push when the
//! queue was already full; the element we pop is the tail we just wrote,
//! never an older request. Draining at the leak rate is the
//! [`LeakyBucketDrainer`](crate::drainer::LeakyBucketDrainer)'s job.
//!
//! Unlike the other engines this one fails closed: a request that was
//! never enqueued was never subjected to the queue bound, so it cannot be
//! admitted.

use ratekeeper_store::{Store, StoreResult};

use crate::{keys, RateLimitSettings};

pub(crate) async fn check_at(
    store: &dyn Store,
    identity: &str,
    settings: &RateLimitSettings,
    now: f64,
) -> StoreResult<bool> {
    let key = keys::leaky_bucket(identity);
    let length = store.rpush(&key, &format!("{now:.6}")).await?;
    if length > settings.limit {
        let _ = store.rpop(&key).await;
        tracing::debug!(identity, length, "leaky bucket full");
        return Ok(false);
    }
    if let Err(err) = store.sadd(keys::ACTIVE_LEAKY_BUCKETS, identity).await {
        // The drainer would never see this bucket; back the enqueue out.
        let _ = store.rpop(&key).await;
        return Err(err);
    }
    Ok(true)
}
