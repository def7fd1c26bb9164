//! Configuration management for Tollgate.
//!
//! Configuration is read once at startup from a YAML file, with
//! `TOLLGATE__SECTION__KEY` environment variables layered on top.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, TollgateError};
use crate::middleware::MissingIdentityPolicy;
use crate::ratelimit::{FailureMode, KeyRule};

/// Prefix for environment variable overrides.
const ENV_PREFIX: &str = "TOLLGATE";

/// Main configuration for the Tollgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
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
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Which counter store backs the limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local counters
    #[default]
    Memory,
    /// Shared counters in Redis
    Redis,
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis connection URL, used when `backend` is `redis`
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Upper bound on a single store round trip in milliseconds
    #[serde(default = "default_store_timeout")]
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis_url: default_redis_url(),
            timeout_ms: default_store_timeout(),
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_store_timeout() -> u64 {
    250
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Behaviour when the counter store cannot be reached
    #[serde(default)]
    pub failure_mode: FailureMode,

    /// Behaviour when a request carries no identity signal for its tier
    #[serde(default)]
    pub missing_identity: MissingIdentityPolicy,

    /// Take the client address from `X-Forwarded-For` / `X-Real-IP`
    #[serde(default)]
    pub trust_forwarded_for: bool,

    /// Tier table. The built-in tiers are used when empty.
    #[serde(default)]
    pub tiers: Vec<TierConfig>,
}

/// Configuration for a single rate limit tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    pub name: String,
    /// Window length in seconds
    pub window_secs: u64,
    /// Requests admitted per window
    pub max_requests: u64,
    /// How the identity key is derived from a request
    pub key_rule: KeyRule,
    /// Count each route separately
    #[serde(default)]
    pub per_route: bool,
    /// Text placed in the rejection details
    #[serde(default)]
    pub message: Option<String>,
}

impl TollgateConfig {
    /// Load configuration from a YAML file, applying environment overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(TollgateError::Config(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }

        config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Yaml))
            .add_source(env_source())
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| TollgateError::Config(e.to_string()))
    }

    /// Load configuration from defaults and environment overrides only.
    pub fn from_env() -> Result<Self> {
        config::Config::builder()
            .add_source(env_source())
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| TollgateError::Config(e.to_string()))
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(format!("Failed to parse configuration: {}", e)))
    }
}

fn env_source() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
}
