//! Process-wide rate-limit configuration.
//!
//! Readers never block: the current `{limit, window}` sits in an
//! [`ArcSwap`] and every load returns the most recently committed value.
//! Writers serialize on an async mutex, persist to the store first, then
//! swap the cache, so other service processes observe the change through
//! the store. A refresh loop pulls the persisted value back in, keeping
//! cross-process staleness bounded to about a second -- well under any
//! legal window.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use ratekeeper_common::{RateKeeperError, RateKeeperResult};
use ratekeeper_store::Store;

use crate::keys;

/// The dynamic part of the limiter configuration. Serialized to the store
/// as `{"limit": .., "window": ..}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSettings {
    pub limit: u64,
    #[serde(rename = "window")]
    pub window_secs: u64,
}

impl RateLimitSettings {
    pub fn validate(&self) -> RateKeeperResult<()> {
        if self.limit < 1 {
            return Err(RateKeeperError::Config("limit must be at least 1".into()));
        }
        if self.window_secs < 1 {
            return Err(RateKeeperError::Config("window must be at least 1".into()));
        }
        Ok(())
    }
}

pub struct ConfigRegistry {
    cached: ArcSwap<RateLimitSettings>,
    defaults: RateLimitSettings,
    store: Arc<dyn Store>,
    write_lock: Mutex<()>,
}

impl ConfigRegistry {
    /// Seed the registry: prefer the value another instance persisted,
    /// fall back to `defaults` (persisting them best-effort).
    pub async fn load(store: Arc<dyn Store>, defaults: RateLimitSettings) -> Self {
        let initial = match store.get(keys::CONFIG).await {
            Ok(Some(raw)) => match serde_json::from_str::<RateLimitSettings>(&raw) {
                Ok(settings) => {
                    info!(limit = settings.limit, window = settings.window_secs, "loaded persisted rate limit configuration");
                    settings
                }
                Err(err) => {
                    warn!(error = %err, "persisted configuration is unreadable, using defaults");
                    defaults
                }
            },
            Ok(None) => {
                if let Err(err) = Self::persist(store.as_ref(), &defaults).await {
                    warn!(error = %err, "could not persist default configuration");
                }
                defaults
            }
            Err(err) => {
                warn!(error = %err, "store unreachable while loading configuration, using defaults");
                defaults
            }
        };
        Self {
            cached: ArcSwap::from_pointee(initial),
            defaults,
            store,
            write_lock: Mutex::new(()),
        }
    }

    /// The most recently committed settings. Lock-free.
    pub fn current(&self) -> Arc<RateLimitSettings> {
        self.cached.load_full()
    }

    pub fn defaults(&self) -> RateLimitSettings {
        self.defaults
    }

    /// Validate, persist, and commit new settings.
    pub async fn update(&self, settings: RateLimitSettings) -> RateKeeperResult<()> {
        settings.validate()?;
        let _guard = self.write_lock.lock().await;
        Self::persist(self.store.as_ref(), &settings).await?;
        self.cached.store(Arc::new(settings));
        info!(
            limit = settings.limit,
            window = settings.window_secs,
            "rate limit configuration updated"
        );
        Ok(())
    }

    /// Restore the startup defaults (used by the reset operation).
    pub async fn reset_to_defaults(&self) -> RateKeeperResult<()> {
        self.update(self.defaults).await
    }

    /// Pull the persisted value back into the cache, picking up updates
    /// committed by other processes. Skips silently when an update by this
    /// process is mid-flight.
    pub async fn refresh(&self) -> RateKeeperResult<()> {
        let Ok(_guard) = self.write_lock.try_lock() else {
            return Ok(());
        };
        if let Some(raw) = self.store.get(keys::CONFIG).await? {
            let settings: RateLimitSettings = serde_json::from_str(&raw)?;
            if settings != *self.current() {
                debug!(
                    limit = settings.limit,
                    window = settings.window_secs,
                    "picked up configuration change from the store"
                );
                self.cached.store(Arc::new(settings));
            }
        }
        Ok(())
    }

    /// Periodic [`refresh`](Self::refresh) until shutdown. Intended for
    /// `tokio::spawn`.
    pub async fn run_refresh(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(err) = self.refresh().await {
                        debug!(error = %err, "configuration refresh failed");
                    }
                }
                _ = shutdown.changed() => {
                    debug!("configuration refresher shutting down");
                    break;
                }
            }
        }
    }

    async fn persist(store: &dyn Store, settings: &RateLimitSettings) -> RateKeeperResult<()> {
        let raw = serde_json::to_string(settings)?;
        store.set(keys::CONFIG, &raw, None).await?;
        Ok(())
    }
}
