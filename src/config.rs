//! Configuration management for rlimiter.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::api::ClientKeySource;
use crate::error::{Result, RlimiterError};
use crate::ratelimit::{LimitSettings, DEFAULT_KEY_PREFIX};

/// Prefix for environment overrides, e.g. `RLIMITER__STORE__REDIS_URL`.
pub const ENV_PREFIX: &str = "RLIMITER";

/// Main configuration for the rlimiter service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RlimiterConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,

    /// How the client key is derived from a request
    #[serde(default)]
    pub client_key: ClientKeySource,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            client_key: ClientKeySource::default(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8000))
}

/// Which counter store implementation to run against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Shared Redis instance
    #[default]
    Redis,
    /// Process-local store; limits are not shared between processes
    Memory,
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store implementation
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Prefix for every counter key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Bound on a store round trip before failing open, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// How often the memory store evicts lapsed windows, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis_url: default_redis_url(),
            key_prefix: default_key_prefix(),
            timeout_ms: default_timeout_ms(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl StoreConfig {
    /// Store timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Sweep interval as a duration.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/".to_string()
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

fn default_timeout_ms() -> u64 {
    50
}

fn default_sweep_interval() -> u64 {
    60
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Limit applied to the catalog API endpoint
    #[serde(default = "default_api_limit")]
    pub api: LimitSettings,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            api: default_api_limit(),
        }
    }
}

fn default_api_limit() -> LimitSettings {
    LimitSettings {
        limit: 300,
        period_secs: 30,
        name: Some("catalog-api".to_string()),
    }
}

impl RlimiterConfig {
    /// Load configuration from an optional file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let config: RlimiterConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| RlimiterError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: RlimiterConfig = serde_yaml::from_str(yaml)
            .map_err(|e| RlimiterError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that could only fail at request time.
    pub fn validate(&self) -> Result<()> {
        self.rate_limiting.api.to_policy()?;
        if self.store.timeout_ms == 0 {
            return Err(RlimiterError::Config(
                "store.timeout_ms must be positive".to_string(),
            ));
        }
        if self.store.sweep_interval_secs == 0 {
            return Err(RlimiterError::Config(
                "store.sweep_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
