//! Configuration management for Tally.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::error::{Result, TallyError};
use crate::ratelimit::LimiterOptions;

/// Prefix for environment overrides, e.g. `TALLY__CACHE__DEFAULT_TTL_MS`.
const ENV_PREFIX: &str = "TALLY";

/// Main configuration for Tally.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TallyConfig {
    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Cache configuration
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Window size in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Hits allowed per key per window
    #[serde(default = "default_max_hits")]
    pub max_hits: u64,

    /// How often expired windows are swept, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Only successful requests count toward the limit
    #[serde(default)]
    pub count_success_only: bool,

    /// Only failed requests count toward the limit
    #[serde(default)]
    pub count_failure_only: bool,

    /// Message returned with a 429
    #[serde(default = "default_deny_message")]
    pub deny_message: String,

    /// Emit `RateLimit-*` headers
    #[serde(default = "default_true")]
    pub standard_headers: bool,

    /// Emit `X-RateLimit-*` headers
    #[serde(default)]
    pub legacy_headers: bool,

    /// Request paths exempt from rate limiting
    #[serde(default = "default_bypass_paths")]
    pub bypass_paths: Vec<String>,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            max_hits: default_max_hits(),
            sweep_interval_secs: default_sweep_interval(),
            count_success_only: false,
            count_failure_only: false,
            deny_message: default_deny_message(),
            standard_headers: true,
            legacy_headers: false,
            bypass_paths: default_bypass_paths(),
        }
    }
}

fn default_window_ms() -> u64 {
    60_000
}

fn default_max_hits() -> u64 {
    100
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_deny_message() -> String {
    "Too many requests, please try again later.".to_string()
}

fn default_true() -> bool {
    true
}

fn default_bypass_paths() -> Vec<String> {
    vec!["/health".to_string()]
}

/// Cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL applied when none is given, in milliseconds
    #[serde(default = "default_ttl_ms")]
    pub default_ttl_ms: u64,

    /// How often expired entries are swept, in seconds
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: default_ttl_ms(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

fn default_ttl_ms() -> u64 {
    300_000
}

fn default_cleanup_interval() -> u64 {
    600
}

impl TallyConfig {
    /// Load configuration from defaults, an optional YAML file, and
    /// `TALLY__`-prefixed environment variables, in increasing precedence.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config: TallyConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("rate_limiting.bypass_paths")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| TallyError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TallyConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TallyError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the limiter, cache or sweepers cannot run with.
    pub fn validate(&self) -> Result<()> {
        LimiterOptions::from_config(&self.rate_limiting).validate()?;

        if self.rate_limiting.sweep_interval_secs == 0 {
            return Err(TallyError::Config(
                "rate_limiting.sweep_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.cache.default_ttl_ms == 0 {
            return Err(TallyError::Config(
                "cache.default_ttl_ms must be greater than zero".to_string(),
            ));
        }
        if self.cache.cleanup_interval_secs == 0 {
            return Err(TallyError::Config(
                "cache.cleanup_interval_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
