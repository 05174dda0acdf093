//! Store-backed global metrics.
//!
//! Counters shared by every service process: total requests, total
//! rejections, and the set of client identities ever observed. Recording
//! is best-effort -- a metrics write that fails must never delay or fail
//! the admission it belongs to.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use ratekeeper_store::{Store, StoreResult};

use crate::keys;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct GlobalMetrics {
    pub total_requests: u64,
    pub total_429s: u64,
    pub active_ips: u64,
}

#[derive(Clone)]
pub struct MetricsRecorder {
    store: Arc<dyn Store>,
}

impl MetricsRecorder {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Count an observed request and remember its identity.
    pub async fn record_request(&self, identity: &str) {
        if let Err(err) = self.store.incr(keys::TOTAL_REQUESTS).await {
            debug!(error = %err, "failed to record request counter");
        }
        if let Err(err) = self.store.sadd(keys::ACTIVE_IPS, identity).await {
            debug!(error = %err, "failed to record active identity");
        }
    }

    /// Count a rejected request.
    pub async fn record_rejection(&self) {
        if let Err(err) = self.store.incr(keys::TOTAL_429S).await {
            debug!(error = %err, "failed to record rejection counter");
        }
    }

    /// Read the global counters for the monitoring surface.
    pub async fn snapshot(&self) -> StoreResult<GlobalMetrics> {
        let total_requests = self.read_counter(keys::TOTAL_REQUESTS).await?;
        let total_429s = self.read_counter(keys::TOTAL_429S).await?;
        let active_ips = self.store.scard(keys::ACTIVE_IPS).await?;
        Ok(GlobalMetrics {
            total_requests,
            total_429s,
            active_ips,
        })
    }

    async fn read_counter(&self, key: &str) -> StoreResult<u64> {
        Ok(self
            .store
            .get(key)
            .await?
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0))
    }
}
