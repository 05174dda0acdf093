//! Background drainer for the leaky buckets.
//!
//! A single task per process ticks at most once per second, leaking every
//! active bucket at `limit / window` entries per second. Fractional leak
//! credit accumulates per bucket between ticks so slow rates still drain
//! (a 10-per-60s limit leaks one entry every six ticks). The drainer never
//! admits or rejects; it only removes what has leaked and retires buckets
//! that ran dry.
//!
//! Bookkeeping is per-process and needs no cross-process coordination:
//! `LPOP` is atomic, so additional drainers in other processes simply
//! share the work.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use ratekeeper_store::{Store, StoreResult};

use crate::registry::ConfigRegistry;
use crate::keys;

pub struct LeakyBucketDrainer {
    store: Arc<dyn Store>,
    registry: Arc<ConfigRegistry>,
    /// Fractional leak credit carried between ticks, per identity.
    credit: HashMap<String, f64>,
    tick: Duration,
}

impl LeakyBucketDrainer {
    /// The tick interval is clamped to at most one second.
    pub fn new(store: Arc<dyn Store>, registry: Arc<ConfigRegistry>, tick: Duration) -> Self {
        let tick = tick.clamp(Duration::from_millis(10), Duration::from_secs(1));
        Self {
            store,
            registry,
            credit: HashMap::new(),
            tick,
        }
    }

    /// Run until the shutdown channel fires. Intended for `tokio::spawn`.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(tick_ms = self.tick.as_millis() as u64, "leaky bucket drainer started");
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; consume it so elapsed time
        // starts counting from here.
        interval.tick().await;
        let mut last_tick = Instant::now();
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    last_tick = Instant::now();
                    self.drain_all(elapsed).await;
                }
                _ = shutdown.changed() => {
                    info!("leaky bucket drainer shutting down");
                    break;
                }
            }
        }
    }

    /// Drain every active bucket by `elapsed_secs` worth of leakage.
    ///
    /// A failing bucket is logged and skipped; the others still drain.
    pub async fn drain_all(&mut self, elapsed_secs: f64) {
        let settings = self.registry.current();
        let leak_rate = settings.limit as f64 / settings.window_secs as f64;
        let active = match self.store.smembers(keys::ACTIVE_LEAKY_BUCKETS).await {
            Ok(identities) => identities,
            Err(err) => {
                warn!(error = %err, "drainer could not list active buckets");
                return;
            }
        };
        let live: HashSet<&str> = active.iter().map(String::as_str).collect();
        self.credit.retain(|identity, _| live.contains(identity.as_str()));
        for identity in &active {
            if let Err(err) = self.drain_bucket(identity, elapsed_secs * leak_rate).await {
                warn!(identity = %identity, error = %err, "failed to drain bucket");
            }
        }
        trace!(buckets = active.len(), "drain tick complete");
    }

    async fn drain_bucket(&mut self, identity: &str, leaked: f64) -> StoreResult<()> {
        let credit = self.credit.entry(identity.to_string()).or_insert(0.0);
        *credit += leaked;
        let take = credit.floor();
        *credit -= take;
        let take = take as usize;

        let key = keys::leaky_bucket(identity);
        if take > 0 {
            let drained = self.store.lpop(&key, take).await?;
            if !drained.is_empty() {
                trace!(identity, drained = drained.len(), "leaked queue entries");
            }
        }
        if self.store.llen(&key).await? == 0 {
            self.store.srem(keys::ACTIVE_LEAKY_BUCKETS, identity).await?;
            self.credit.remove(identity);
            debug!(identity, "leaky bucket drained dry, retired");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RateLimitSettings;
    use ratekeeper_store::MemoryStore;

    async fn setup(limit: u64, window_secs: u64) -> (Arc<MemoryStore>, LeakyBucketDrainer) {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(
            ConfigRegistry::load(
                store.clone() as Arc<dyn Store>,
                RateLimitSettings { limit, window_secs },
            )
            .await,
        );
        let drainer = LeakyBucketDrainer::new(
            store.clone() as Arc<dyn Store>,
            registry,
            Duration::from_secs(1),
        );
        (store, drainer)
    }

    async fn enqueue(store: &MemoryStore, identity: &str, count: usize) {
        for i in 0..count {
            store
                .rpush(&keys::leaky_bucket(identity), &format!("{i}"))
                .await
                .unwrap();
        }
        store
            .sadd(keys::ACTIVE_LEAKY_BUCKETS, identity)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn leaks_at_the_configured_rate() {
        // 10 per 60s: one entry every six seconds.
        let (store, mut drainer) = setup(10, 60).await;
        enqueue(&store, "a", 10).await;

        // Three seconds is half an entry; nothing leaks yet.
        drainer.drain_all(3.0).await;
        assert_eq!(store.llen(&keys::leaky_bucket("a")).await.unwrap(), 10);

        // Three more complete the first entry.
        drainer.drain_all(3.0).await;
        assert_eq!(store.llen(&keys::leaky_bucket("a")).await.unwrap(), 9);

        // A minute drains the rest.
        drainer.drain_all(60.0).await;
        assert_eq!(store.llen(&keys::leaky_bucket("a")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn drains_oldest_entries_first() {
        let (store, mut drainer) = setup(2, 1).await;
        enqueue(&store, "a", 2).await;
        drainer.drain_all(0.5).await;
        let remaining = store
            .lrange(&keys::leaky_bucket("a"), 0, -1)
            .await
            .unwrap();
        assert_eq!(remaining, vec!["1".to_string()]);
    }

    #[tokio::test]
    async fn retires_empty_buckets() {
        let (store, mut drainer) = setup(10, 1).await;
        enqueue(&store, "a", 2).await;
        drainer.drain_all(1.0).await;
        assert_eq!(store.llen(&keys::leaky_bucket("a")).await.unwrap(), 0);
        assert_eq!(store.scard(keys::ACTIVE_LEAKY_BUCKETS).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn credit_accumulates_across_ticks() {
        // 1 per 4s: four one-second ticks per leaked entry.
        let (store, mut drainer) = setup(1, 4).await;
        enqueue(&store, "a", 1).await;
        for _ in 0..3 {
            drainer.drain_all(1.0).await;
        }
        assert_eq!(store.llen(&keys::leaky_bucket("a")).await.unwrap(), 1);
        drainer.drain_all(1.0).await;
        assert_eq!(store.llen(&keys::leaky_bucket("a")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn buckets_drain_independently() {
        let (store, mut drainer) = setup(2, 2).await;
        enqueue(&store, "a", 2).await;
        enqueue(&store, "b", 1).await;
        drainer.drain_all(1.0).await;
        assert_eq!(store.llen(&keys::leaky_bucket("a")).await.unwrap(), 1);
        assert_eq!(store.llen(&keys::leaky_bucket("b")).await.unwrap(), 0);
        // b is retired, a stays active.
        let active = store.smembers(keys::ACTIVE_LEAKY_BUCKETS).await.unwrap();
        assert_eq!(active, vec!["a".to_string()]);
    }
}
