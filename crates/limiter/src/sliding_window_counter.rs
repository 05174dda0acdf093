//! Sliding window counter.
//!
//! Time is partitioned into fixed slices of `window` seconds. Each slice
//! gets a counter, and the sliding estimate blends the previous slice's
//! count by how much of it still overlaps the window:
//!
//! ```text
//! estimate = (1 - offset) * count(previous) + count(current)
//! ```
//!
//! where `offset` is the fraction of the current slice already elapsed.
//! The estimate assumes arrivals were uniform within the previous slice;
//! that approximation is the algorithm's trade for keeping only two small
//! counters per identity.

use ratekeeper_store::{AtomicOp, Store, StoreResult};

use crate::{keys, RateLimitSettings};

pub(crate) async fn check_at(
    store: &dyn Store,
    identity: &str,
    settings: &RateLimitSettings,
    now: f64,
) -> StoreResult<bool> {
    let window = settings.window_secs as f64;
    let slice = (now / window).floor() as i64;
    let offset = (now - slice as f64 * window) / window;
    let current_key = keys::sliding_window_counter(identity, slice);
    let previous_key = keys::sliding_window_counter(identity, slice - 1);
    let admitted = store
        .run_atomic(AtomicOp::SlidingCounterAdmit {
            current_key: &current_key,
            previous_key: &previous_key,
            previous_weight: 1.0 - offset,
            limit: settings.limit,
            ttl_secs: settings.window_secs * 2,
        })
        .await?
        == 1;
    if !admitted {
        tracing::debug!(identity, slice, "sliding window counter limit exceeded");
    }
    Ok(admitted)
}
