//! Fixed window counter.
//!
//! One counter per identity, reset by TTL every `window` seconds. The
//! increment and the TTL assignment run in one atomic unit so a concurrent
//! admission can never observe a counter without its window deadline. Up to
//! `2 * limit` admissions can land in a window straddling the reset
//! boundary; that is a property of the algorithm, not a bug.

use ratekeeper_store::{AtomicOp, Store, StoreResult};

use crate::{keys, RateLimitSettings};

pub(crate) async fn check_at(
    store: &dyn Store,
    identity: &str,
    settings: &RateLimitSettings,
    _now: f64,
) -> StoreResult<bool> {
    let key = keys::fixed_window(identity);
    let count = store
        .run_atomic(AtomicOp::FixedWindowIncr {
            key: &key,
            window_secs: settings.window_secs,
        })
        .await?;
    let admitted = count as u64 <= settings.limit;
    if !admitted {
        tracing::debug!(identity, count, "fixed window limit exceeded");
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
    async fn admits_exactly_limit_in_a_window() {
        let store = MemoryStore::new();
        for i in 0..10 {
            assert!(
                check_at(&store, "a", &SETTINGS, 0.0).await.unwrap(),
                "request {} should be admitted",
                i
            );
        }
        assert!(!check_at(&store, "a", &SETTINGS, 0.5).await.unwrap());
        assert!(!check_at(&store, "a", &SETTINGS, 1.0).await.unwrap());
    }

    #[tokio::test]
    async fn window_expiry_resets_the_counter() {
        let store = MemoryStore::new();
        let settings = RateLimitSettings {
            limit: 2,
            window_secs: 1,
        };
        assert!(check_at(&store, "a", &settings, 0.0).await.unwrap());
        assert!(check_at(&store, "a", &settings, 0.0).await.unwrap());
        assert!(!check_at(&store, "a", &settings, 0.0).await.unwrap());
        // The counter's TTL is real time; wait out the one-second window.
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        assert!(check_at(&store, "a", &settings, 61.0).await.unwrap());
    }

    #[tokio::test]
    async fn identities_do_not_share_counters() {
        let store = MemoryStore::new();
        let settings = RateLimitSettings {
            limit: 1,
            window_secs: 60,
        };
        assert!(check_at(&store, "a", &settings, 0.0).await.unwrap());
        assert!(!check_at(&store, "a", &settings, 0.0).await.unwrap());
        assert!(check_at(&store, "b", &settings, 0.0).await.unwrap());
    }
}
