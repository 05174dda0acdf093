use serde::{Deserialize, Serialize};

/// Top-level service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub drainer: DrainerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    /// Use the in-process store even when Redis is reachable.
    #[serde(default)]
    pub force_memory: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            force_memory: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_limit")]
    pub limit: u64,
    #[serde(default = "default_window")]
    pub window_secs: u64,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            window_secs: default_window(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

/// What to do with an admission check when the store is unreachable.
///
/// The leaky bucket is exempt: a request that could not be enqueued is
/// always rejected, since admitting it would bypass the queue entirely.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    #[default]
    Open,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrainerConfig {
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

impl Default for DrainerConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
        }
    }
}

// Default value helpers
fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_limit() -> u64 {
    10
}
fn default_window() -> u64 {
    60
}
fn default_tick_ms() -> u64 {
    1000
}

impl AppConfig {
    /// Load configuration from a YAML file, apply environment overrides,
    /// and validate the result.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = serde_yaml::from_str(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Like [`load`](Self::load), but falls back to built-in defaults when
    /// no config file path was given.
    pub fn load_or_default(path: Option<&str>) -> anyhow::Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => {
                let mut config = Self::default();
                config.apply_env_overrides();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Environment variables take precedence over the config file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("RATEKEEPER_LISTEN") {
            self.server.listen = v;
        }
        if let Ok(v) = std::env::var("RATEKEEPER_REDIS_URL") {
            self.store.redis_url = v;
        }
        if let Ok(v) = std::env::var("RATEKEEPER_FORCE_MEMORY") {
            self.store.force_memory = matches!(v.as_str(), "1" | "true" | "yes");
        }
        if let Ok(v) = std::env::var("RATEKEEPER_LIMIT") {
            match v.parse() {
                Ok(limit) => self.rate_limit.limit = limit,
                Err(_) => tracing::warn!(value = %v, "ignoring unparseable RATEKEEPER_LIMIT"),
            }
        }
        if let Ok(v) = std::env::var("RATEKEEPER_WINDOW") {
            match v.parse() {
                Ok(window) => self.rate_limit.window_secs = window,
                Err(_) => tracing::warn!(value = %v, "ignoring unparseable RATEKEEPER_WINDOW"),
            }
        }
    }

    /// Validate the configuration for consistency.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.listen.is_empty() {
            anyhow::bail!("server.listen must not be empty");
        }
        if self.rate_limit.limit < 1 {
            anyhow::bail!("rate_limit.limit must be at least 1");
        }
        if self.rate_limit.window_secs < 1 {
            anyhow::bail!("rate_limit.window_secs must be at least 1");
        }
        if self.drainer.tick_ms < 10 || self.drainer.tick_ms > 1000 {
            anyhow::bail!("drainer.tick_ms must be between 10 and 1000");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.rate_limit.limit, 10);
        assert_eq!(config.rate_limit.window_secs, 60);
        assert_eq!(config.rate_limit.failure_policy, FailurePolicy::Open);
    }

    #[test]
    fn parses_partial_yaml() {
        let yaml = r#"
server:
  listen: "127.0.0.1:9000"
rate_limit:
  limit: 3
  window_secs: 10
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:9000");
        assert_eq!(config.rate_limit.limit, 3);
        // Unspecified sections fall back to defaults.
        assert_eq!(config.store.redis_url, "redis://127.0.0.1:6379");
        assert_eq!(config.drainer.tick_ms, 1000);
    }

    #[test]
    fn rejects_zero_limit() {
        let mut config = AppConfig::default();
        config.rate_limit.limit = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_oversized_drainer_tick() {
        let mut config = AppConfig::default();
        config.drainer.tick_ms = 5000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn failure_policy_round_trips() {
        let yaml = "rate_limit:\n  failure_policy: closed\n";
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.rate_limit.failure_policy, FailurePolicy::Closed);
    }
}
