//! Rate-limiting decision engines.
//!
//! This crate provides five admission algorithms behind a unified
//! [`RateLimiter`] facade:
//!
//! - **Fixed window counter** -- one counter per identity per window.
//!   Cheapest, with the well-known double-burst anomaly at window
//!   boundaries.
//!
//! - **Sliding window log** -- exact: a timestamp per admitted request,
//!   pruned as the window slides. The most precise and the most
//!   state-hungry.
//!
//! - **Sliding window counter** -- approximates the log by blending the
//!   previous and current window counts. Minimal state, smooth limiting.
//!
//! - **Token bucket** -- steady refill with burst tolerance up to the
//!   bucket capacity.
//!
//! - **Leaky bucket** -- a bounded FIFO queue drained at a constant rate
//!   by the background [`LeakyBucketDrainer`]; overflow is rejected.
//!
//! All shared state lives in a [`Store`], so any number of service
//! processes can enforce the same limits against the same backend. Each
//! engine's check-and-update sequence executes atomically store-side;
//! concurrent admissions can never both observe the last free slot.

pub mod drainer;
pub mod keys;
pub mod metrics;
pub mod registry;

mod fixed_window;
mod leaky_bucket;
mod sliding_window_counter;
mod sliding_window_log;
mod token_bucket;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use ratekeeper_store::{Store, StoreResult};

pub use drainer::LeakyBucketDrainer;
pub use metrics::{GlobalMetrics, MetricsRecorder};
pub use registry::{ConfigRegistry, RateLimitSettings};

/// The admission algorithms, keyed by their wire names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    #[default]
    FixedWindow,
    SlidingWindowLog,
    SlidingWindowCounter,
    TokenBucket,
    LeakyBucket,
}

impl Algorithm {
    pub const ALL: [Algorithm; 5] = [
        Algorithm::FixedWindow,
        Algorithm::SlidingWindowLog,
        Algorithm::SlidingWindowCounter,
        Algorithm::TokenBucket,
        Algorithm::LeakyBucket,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::FixedWindow => "fixed_window",
            Algorithm::SlidingWindowLog => "sliding_window_log",
            Algorithm::SlidingWindowCounter => "sliding_window_counter",
            Algorithm::TokenBucket => "token_bucket",
            Algorithm::LeakyBucket => "leaky_bucket",
        }
    }

    /// Resolve a request's `algo` parameter. Absent or unknown names fall
    /// back to the fixed window counter.
    pub fn from_query(value: Option<&str>) -> Self {
        match value {
            None => Algorithm::default(),
            Some(name) => match name {
                "fixed_window" => Algorithm::FixedWindow,
                "sliding_window_log" => Algorithm::SlidingWindowLog,
                "sliding_window_counter" => Algorithm::SlidingWindowCounter,
                "token_bucket" => Algorithm::TokenBucket,
                "leaky_bucket" => Algorithm::LeakyBucket,
                other => {
                    tracing::debug!(algo = %other, "unknown algorithm, using fixed_window");
                    Algorithm::default()
                }
            },
        }
    }
}

/// Seconds since the Unix epoch, fractional.
pub(crate) fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// A unified rate limiter dispatching to the five algorithm engines.
///
/// Cheaply cloneable and safe to share across tasks; all mutable state is
/// store-side.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn Store>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Check whether a request from `identity` is admitted under `algorithm`
    /// with the given settings.
    ///
    /// Returns `Ok(true)` to admit, `Ok(false)` to reject; an `Err` means
    /// the store could not answer and the caller's failure policy applies.
    pub async fn check(
        &self,
        algorithm: Algorithm,
        identity: &str,
        settings: &RateLimitSettings,
    ) -> StoreResult<bool> {
        self.check_at(algorithm, identity, settings, unix_now()).await
    }

    /// [`check`](Self::check) at an explicit timestamp, for deterministic
    /// replay of admission sequences.
    pub async fn check_at(
        &self,
        algorithm: Algorithm,
        identity: &str,
        settings: &RateLimitSettings,
        now: f64,
    ) -> StoreResult<bool> {
        let store = self.store.as_ref();
        match algorithm {
            Algorithm::FixedWindow => fixed_window::check_at(store, identity, settings, now).await,
            Algorithm::SlidingWindowLog => {
                sliding_window_log::check_at(store, identity, settings, now).await
            }
            Algorithm::SlidingWindowCounter => {
                sliding_window_counter::check_at(store, identity, settings, now).await
            }
            Algorithm::TokenBucket => token_bucket::check_at(store, identity, settings, now).await,
            Algorithm::LeakyBucket => leaky_bucket::check_at(store, identity, settings, now).await,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }
}
