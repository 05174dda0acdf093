use std::sync::{Arc, RwLock};
use std::time::Instant;

use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

use ratekeeper_common::AppConfig;
use ratekeeper_limiter::{ConfigRegistry, MetricsRecorder, RateLimiter};
use ratekeeper_store::Store;

/// Shared state type alias used across all route handlers.
pub type SharedState = Arc<AppState>;

/// Central application state: the store handle, the decision engines, and
/// process-local metrics.
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn Store>,
    pub limiter: RateLimiter,
    pub registry: Arc<ConfigRegistry>,
    pub recorder: MetricsRecorder,
    pub metrics: ServiceMetrics,
    /// Most recent store failure, surfaced by the health endpoint.
    pub last_store_error: RwLock<Option<String>>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: AppConfig, store: Arc<dyn Store>, registry: Arc<ConfigRegistry>) -> Self {
        Self {
            limiter: RateLimiter::new(store.clone()),
            recorder: MetricsRecorder::new(store.clone()),
            config,
            store,
            registry,
            metrics: ServiceMetrics::new(),
            last_store_error: RwLock::new(None),
            start_time: Instant::now(),
        }
    }

    pub fn note_store_error(&self, error: impl ToString) {
        self.metrics.store_errors_total.inc();
        let mut last = self
            .last_store_error
            .write()
            .expect("store error lock poisoned");
        *last = Some(error.to_string());
    }

    pub fn last_store_error(&self) -> Option<String> {
        self.last_store_error
            .read()
            .expect("store error lock poisoned")
            .clone()
    }
}

/// Prometheus metrics for this process. The cross-process counters live in
/// the store and are reported by `/api/monitor`; these cover what only the
/// process itself can see.
pub struct ServiceMetrics {
    pub registry: Registry,
    pub requests_total: IntCounter,
    pub requests_rejected: IntCounterVec,
    pub store_errors_total: IntCounter,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let requests_total = IntCounter::with_opts(Opts::new(
            "ratekeeper_requests_total",
            "Total number of admission requests processed",
        ))
        .expect("failed to create requests_total counter");

        let requests_rejected = IntCounterVec::new(
            Opts::new(
                "ratekeeper_requests_rejected_total",
                "Number of requests rejected, per algorithm",
            ),
            &["algorithm"],
        )
        .expect("failed to create requests_rejected counter");

        let store_errors_total = IntCounter::with_opts(Opts::new(
            "ratekeeper_store_errors_total",
            "Number of store operations that failed",
        ))
        .expect("failed to create store_errors_total counter");

        registry
            .register(Box::new(requests_total.clone()))
            .expect("failed to register requests_total");
        registry
            .register(Box::new(requests_rejected.clone()))
            .expect("failed to register requests_rejected");
        registry
            .register(Box::new(store_errors_total.clone()))
            .expect("failed to register store_errors_total");

        Self {
            registry,
            requests_total,
            requests_rejected,
            store_errors_total,
        }
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}
