use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use ratekeeper_common::AppConfig;
use ratekeeper_limiter::{ConfigRegistry, LeakyBucketDrainer, RateLimitSettings};
use ratekeeper_server::state::AppState;
use ratekeeper_server::run_server;
use ratekeeper_store::{MemoryStore, RedisStore, Store};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    // Parse command-line args for config path
    let config_path = std::env::args().nth(1);
    let config = AppConfig::load_or_default(config_path.as_deref())?;
    info!(config_path = config_path.as_deref().unwrap_or("<defaults>"), "starting ratekeeper");

    let store = build_store(&config).await;
    let registry = Arc::new(
        ConfigRegistry::load(
            store.clone(),
            RateLimitSettings {
                limit: config.rate_limit.limit,
                window_secs: config.rate_limit.window_secs,
            },
        )
        .await,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Background workers: the leaky-bucket drainer and the config refresher.
    let drainer = LeakyBucketDrainer::new(
        store.clone(),
        registry.clone(),
        Duration::from_millis(config.drainer.tick_ms),
    );
    tokio::spawn(drainer.run(shutdown_rx.clone()));
    tokio::spawn(registry.clone().run_refresh(shutdown_rx.clone()));

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
        }
        let _ = shutdown_tx.send(true);
    });

    let listen_addr = config.server.listen.clone();
    let state = Arc::new(AppState::new(config, store, registry));
    run_server(state, &listen_addr, shutdown_rx).await?;

    info!("ratekeeper stopped");
    Ok(())
}

/// Pick the store backend: the in-process fake when forced or when Redis
/// cannot be reached at startup, otherwise Redis.
async fn build_store(config: &AppConfig) -> Arc<dyn Store> {
    if config.store.force_memory {
        info!("using in-process store (forced by configuration)");
        return Arc::new(MemoryStore::new());
    }
    match RedisStore::connect(&config.store.redis_url).await {
        Ok(store) => {
            info!(url = %config.store.redis_url, "connected to redis");
            Arc::new(store)
        }
        Err(err) => {
            warn!(
                url = %config.store.redis_url,
                error = %err,
                "redis unreachable, falling back to the in-process store"
            );
            Arc::new(MemoryStore::new())
        }
    }
}
