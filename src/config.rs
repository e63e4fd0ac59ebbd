//! Configuration management for Gatekeeper.

use serde::{Deserialize, Serialize};

use crate::ratelimit::PolicySet;

/// Main configuration for the Gatekeeper governance layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatekeeperConfig {
    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Response cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Rate limit policies (defaults mirror the built-in policy set)
    #[serde(default)]
    pub policies: PolicySet,

    /// Shared secret that bypasses all rate limit policies when presented
    /// by a request. Unset disables the operator bypass entirely.
    #[serde(default)]
    pub bypass_secret: Option<String>,
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Remote store connection URL (e.g. "redis://127.0.0.1:6379").
    /// Unset runs the adapter permanently on the in-process table.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Namespace prefix applied to every remote counter key
    #[serde(default = "default_key_namespace")]
    pub key_namespace: String,

    /// Bound on any single remote operation, in milliseconds
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_ms: u64,

    /// Interval between remote health probes while degraded, in seconds
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,

    /// Interval between expiry sweeps of the local fallback table, in seconds
    #[serde(default = "default_store_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_namespace: default_key_namespace(),
            operation_timeout_ms: default_operation_timeout(),
            probe_interval_secs: default_probe_interval(),
            sweep_interval_secs: default_store_sweep_interval(),
        }
    }
}

fn default_key_namespace() -> String {
    "gk:rl:".to_string()
}

fn default_operation_timeout() -> u64 {
    500
}

fn default_probe_interval() -> u64 {
    5
}

fn default_store_sweep_interval() -> u64 {
    60
}

/// Response cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL applied when a caller does not choose one, in seconds
    #[serde(default = "default_cache_ttl")]
    pub default_ttl_secs: u64,

    /// Interval between expiry sweeps, in seconds
    #[serde(default = "default_cache_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_cache_ttl(),
            sweep_interval_secs: default_cache_sweep_interval(),
        }
    }
}

fn default_cache_ttl() -> u64 {
    30 * 60
}

fn default_cache_sweep_interval() -> u64 {
    10 * 60
}

impl GatekeeperConfig {
    /// Load configuration from a file path.
    pub fn from_file(path: &str) -> crate::error::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> crate::error::Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| crate::error::GatekeeperError::Config(e.to_string()))
    }

    /// Bound on any single remote store operation.
    pub fn operation_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.store.operation_timeout_ms)
    }
}
