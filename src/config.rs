//! Configuration management for Turnstile.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{AppError, Result};

/// Reference shown when a config file fails to parse.
const SCHEMA_HINT: &str = r#"{
  "max_ips": 1000000,
  "shards": 16,
  "token_bucket": {
    "max_tokens": 100.0,
    "refill_rate": 10.0,
    "token_cost": 1.0,
    "expiry_seconds": 600,
    "janitor_interval_seconds": 60
  },
  "server": { "listen_addr": "0.0.0.0:18080" }
}"#;

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Soft capacity hint for the expected number of tracked
    /// identities; used to pre-size shard maps, not a hard limit.
    #[serde(default = "default_max_ips")]
    pub max_ips: usize,

    /// Number of lock partitions in the engine.
    #[serde(default = "default_shards")]
    pub shards: usize,

    /// Token bucket parameters
    #[serde(default)]
    pub token_bucket: TokenBucketConfig,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_ips: default_max_ips(),
            shards: default_shards(),
            token_bucket: TokenBucketConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

/// Token bucket configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBucketConfig {
    /// Bucket ceiling (burst size)
    #[serde(default = "default_max_tokens")]
    pub max_tokens: f64,

    /// Tokens regained per second
    #[serde(default = "default_refill_rate")]
    pub refill_rate: f64,

    /// Tokens one admission check costs
    #[serde(default = "default_token_cost")]
    pub token_cost: f64,

    /// Idle seconds before the janitor evicts an identity
    #[serde(default = "default_expiry_seconds")]
    pub expiry_seconds: u64,

    /// Seconds between janitor sweeps
    #[serde(default = "default_janitor_interval_seconds")]
    pub janitor_interval_seconds: u64,
}

impl Default for TokenBucketConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            refill_rate: default_refill_rate(),
            token_cost: default_token_cost(),
            expiry_seconds: default_expiry_seconds(),
            janitor_interval_seconds: default_janitor_interval_seconds(),
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP server binds to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_max_ips() -> usize {
    1_000_000
}

fn default_shards() -> usize {
    16
}

fn default_max_tokens() -> f64 {
    100.0
}

fn default_refill_rate() -> f64 {
    10.0
}

fn default_token_cost() -> f64 {
    1.0
}

fn default_expiry_seconds() -> u64 {
    600
}

fn default_janitor_interval_seconds() -> u64 {
    60
}

fn default_listen_addr() -> SocketAddr {
    "0.0.0.0:18080".parse().unwrap()
}

impl AppConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            serde_json::from_str(&contents).map_err(|e| AppError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Load configuration from a JSON file, falling back to defaults.
    ///
    /// A missing or malformed file is never fatal: it is reported as
    /// a warning and the built-in defaults are used instead.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::from_file(path) {
            Ok(config) => {
                info!(path = %path.display(), "Configuration loaded");
                config
            }
            Err(AppError::Io(e)) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Config file not readable, using defaults"
                );
                Self::default()
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Config file malformed, using defaults. Expected schema:\n{SCHEMA_HINT}"
                );
                Self::default()
            }
        }
    }

    /// Derive the immutable engine configuration, clamping values the
    /// engine cannot operate with back to their defaults.
    pub fn limiter(&self) -> LimiterConfig {
        let mut cfg = LimiterConfig {
            max_ips: self.max_ips.max(1),
            shards: self.shards,
            max_tokens: self.token_bucket.max_tokens,
            refill_rate: self.token_bucket.refill_rate,
            token_cost: self.token_bucket.token_cost,
            expiry_timeout: Duration::from_secs(self.token_bucket.expiry_seconds),
            janitor_interval: Duration::from_secs(self.token_bucket.janitor_interval_seconds),
        };

        if cfg.shards == 0 {
            warn!("shards must be >= 1, using {}", default_shards());
            cfg.shards = default_shards();
        }
        if !(cfg.max_tokens > 0.0) {
            warn!("max_tokens must be positive, using {}", default_max_tokens());
            cfg.max_tokens = default_max_tokens();
        }
        if !(cfg.refill_rate > 0.0) {
            warn!(
                "refill_rate must be positive, using {}",
                default_refill_rate()
            );
            cfg.refill_rate = default_refill_rate();
        }
        if !(cfg.token_cost > 0.0) {
            warn!("token_cost must be positive, using {}", default_token_cost());
            cfg.token_cost = default_token_cost();
        }

        cfg
    }
}

/// Immutable engine configuration, fixed at construction.
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// Soft capacity hint for tracked identities
    pub max_ips: usize,
    /// Number of lock partitions, always >= 1
    pub shards: usize,
    /// Bucket ceiling
    pub max_tokens: f64,
    /// Tokens regained per second
    pub refill_rate: f64,
    /// Tokens per admission check
    pub token_cost: f64,
    /// Idle duration before eviction
    pub expiry_timeout: Duration,
    /// Janitor sweep period
    pub janitor_interval: Duration,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        AppConfig::default().limiter()
    }
}
