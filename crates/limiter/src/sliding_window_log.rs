//! Sliding window log.
//!
//! Keeps one sorted-set member per admitted request, scored by its
//! timestamp. Admission prunes everything older than the window, counts
//! what is left, and records the new request only if the count is still
//! under the limit -- all in one atomic unit, otherwise two concurrent
//! requests could both see the last free slot.

use std::sync::atomic::{AtomicU64, Ordering};

use ratekeeper_store::{AtomicOp, Store, StoreResult};

use crate::{keys, RateLimitSettings};

/// Distinguishes members recorded within the same timestamp granularity.
static MEMBER_SEQ: AtomicU64 = AtomicU64::new(0);

pub(crate) async fn check_at(
    store: &dyn Store,
    identity: &str,
    settings: &RateLimitSettings,
    now: f64,
) -> StoreResult<bool> {
    let key = keys::sliding_window_log(identity);
    let member = format!("{now:.6}-{}", MEMBER_SEQ.fetch_add(1, Ordering::Relaxed));
    let admitted = store
        .run_atomic(AtomicOp::SlidingLogAdmit {
            key: &key,
            now,
            window_secs: settings.window_secs,
            limit: settings.limit,
            member: &member,
        })
        .await?
        == 1;
    if !admitted {
        tracing::debug!(identity, "sliding window log limit exceeded");
    }
    Ok(admitted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratekeeper_store::MemoryStore;

    const SETTINGS: RateLimitSettings = RateLimitSettings {
        limit: 10,
        window_secs: 60,
    };

    #[tokio::test]
    async fn counts_requests_inside_the_window() {
        let store = MemoryStore::new();
        let t0 = 1_000_000.0;
        for _ in 0..10 {
            assert!(check_at(&store, "a", &SETTINGS, t0).await.unwrap());
        }
        // Nothing has expired at t0 + 59.9, so the log is still full.
        assert!(!check_at(&store, "a", &SETTINGS, t0 + 59.9).await.unwrap());
        // At t0 + 60.05 the t0 entries have slid out of the window.
        assert!(check_at(&store, "a", &SETTINGS, t0 + 60.05).await.unwrap());
    }

    #[tokio::test]
    async fn window_slides_continuously() {
        let store = MemoryStore::new();
        let settings = RateLimitSettings {
            limit: 2,
            window_secs: 10,
        };
        let t0 = 1_000_000.0;
        assert!(check_at(&store, "a", &settings, t0).await.unwrap());
        assert!(check_at(&store, "a", &settings, t0 + 5.0).await.unwrap());
        assert!(!check_at(&store, "a", &settings, t0 + 9.0).await.unwrap());
        // t0 has expired, t0+5 has not.
        assert!(check_at(&store, "a", &settings, t0 + 11.0).await.unwrap());
        assert!(!check_at(&store, "a", &settings, t0 + 12.0).await.unwrap());
    }

    #[tokio::test]
    async fn simultaneous_requests_get_distinct_members() {
        let store = MemoryStore::new();
        let t0 = 1_000_000.0;
        // Identical timestamps must still occupy one slot each.
        for i in 0..10 {
            assert!(
                check_at(&store, "a", &SETTINGS, t0).await.unwrap(),
                "request {} should be admitted",
                i
            );
        }
        assert!(!check_at(&store, "a", &SETTINGS, t0).await.unwrap());
        let key = keys::sliding_window_log("a");
        assert_eq!(store.zcard(&key).await.unwrap(), 10);
    }
}
