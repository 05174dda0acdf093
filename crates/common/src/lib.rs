pub mod config;
pub mod error;

pub use config::{AppConfig, DrainerConfig, FailurePolicy, RateLimitConfig, ServerConfig, StoreConfig};
pub use error::{RateKeeperError, RateKeeperResult};
