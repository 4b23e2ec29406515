//! Node configuration

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub prediction: PredictionConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique node identifier
    #[serde(default = "default_node_id")]
    pub id: String,

    /// Root directory for cached content and the catalog database
    #[serde(default = "default_cache_root")]
    pub cache_root: PathBuf,

    /// Host (and optional port) under which local clients reach this node's
    /// cache server; used when rewriting intercepted requests
    #[serde(default = "default_local_host")]
    pub local_host: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// HTTP port for the proxy-decision and status API
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Capacity budget in bytes for downloaded content
    #[serde(default = "default_capacity_bytes")]
    pub capacity_bytes: u64,

    /// Age threshold after which a cached item is evicted (seconds)
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// Number of consecutive prediction cycles an item may be absent from
    /// both ranked lists before it is evicted
    #[serde(default = "default_grace_cycles")]
    pub grace_cycles: u32,

    /// Cache-cleaning cycle period (seconds)
    #[serde(default = "default_clean_interval")]
    pub clean_interval_secs: u64,

    /// Bound on concurrent outbound downloads
    #[serde(default = "default_max_fetches")]
    pub max_concurrent_fetches: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionConfig {
    /// Prediction + fusion cycle period (seconds)
    #[serde(default = "default_prediction_interval")]
    pub interval_secs: u64,

    /// Half-life for engagement-feature decay (seconds)
    #[serde(default = "default_half_life")]
    pub decay_half_life_secs: u64,

    /// How far back feed signals are considered (seconds)
    #[serde(default = "default_signal_window")]
    pub signal_window_secs: u64,

    /// Distance scale for locality proximity weighting (km)
    #[serde(default = "default_locality_scale_km")]
    pub locality_scale_km: f64,

    /// Whether the engagement predictor runs
    #[serde(default = "default_true")]
    pub engagement_enabled: bool,

    /// Whether the locality predictor runs
    #[serde(default = "default_true")]
    pub locality_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Model retraining period (seconds)
    #[serde(default = "default_training_interval")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Per-request timeout (seconds)
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,

    /// Retry budget per fetch before the item is abandoned for the cycle
    #[serde(default = "default_fetch_retries")]
    pub retries: u32,
}

/// Endpoints of the external capabilities. A predictor whose upstream is
/// not configured is disabled for the corresponding cycle.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpstreamConfig {
    /// Peer directory base URL (overlay "who has replica X" lookups)
    #[serde(default)]
    pub directory_url: Option<String>,

    /// Feed source base URL (social engagement signals)
    #[serde(default)]
    pub feed_url: Option<String>,
}

// Defaults
fn default_node_id() -> String { "edge-1".to_string() }
fn default_cache_root() -> PathBuf { PathBuf::from("/var/lib/edgecache") }
fn default_local_host() -> String { "127.0.0.1:8080".to_string() }
fn default_http_port() -> u16 { 8080 }
fn default_capacity_bytes() -> u64 { 8_000_000_000 } // 8GB
fn default_retention_secs() -> u64 { 7 * 24 * 3600 } // 1 week
fn default_grace_cycles() -> u32 { 4 }
fn default_clean_interval() -> u64 { 6 * 3600 }
fn default_max_fetches() -> usize { 4 }
fn default_prediction_interval() -> u64 { 1800 }
fn default_half_life() -> u64 { 24 * 3600 }
fn default_signal_window() -> u64 { 7 * 24 * 3600 }
fn default_locality_scale_km() -> f64 { 500.0 }
fn default_true() -> bool { true }
fn default_training_interval() -> u64 { 24 * 3600 }
fn default_fetch_timeout() -> u64 { 30 }
fn default_fetch_retries() -> u32 { 2 }

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: default_node_id(),
            cache_root: default_cache_root(),
            local_host: default_local_host(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { http_port: default_http_port() }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: default_capacity_bytes(),
            retention_secs: default_retention_secs(),
            grace_cycles: default_grace_cycles(),
            clean_interval_secs: default_clean_interval(),
            max_concurrent_fetches: default_max_fetches(),
        }
    }
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_prediction_interval(),
            decay_half_life_secs: default_half_life(),
            signal_window_secs: default_signal_window(),
            locality_scale_km: default_locality_scale_km(),
            engagement_enabled: true,
            locality_enabled: true,
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self { interval_secs: default_training_interval() }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout(),
            retries: default_fetch_retries(),
        }
    }
}

/// Invalid configuration at startup. Fatal: the node must not start with a
/// nonsensical budget or period.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("cache capacity must be greater than zero")]
    ZeroCapacity,

    #[error("{0} period must be greater than zero")]
    ZeroPeriod(&'static str),

    #[error("decay half-life must be greater than zero")]
    ZeroHalfLife,

    #[error("locality distance scale must be positive, got {0}")]
    BadLocalityScale(f64),

    #[error("max concurrent fetches must be greater than zero")]
    ZeroFetchSlots,
}

impl Config {
    /// Reject values the caching engine cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.capacity_bytes == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.prediction.interval_secs == 0 {
            return Err(ConfigError::ZeroPeriod("prediction"));
        }
        if self.training.interval_secs == 0 {
            return Err(ConfigError::ZeroPeriod("training"));
        }
        if self.cache.clean_interval_secs == 0 {
            return Err(ConfigError::ZeroPeriod("cache-cleaning"));
        }
        if self.cache.retention_secs == 0 {
            return Err(ConfigError::ZeroPeriod("retention"));
        }
        if self.prediction.decay_half_life_secs == 0 {
            return Err(ConfigError::ZeroHalfLife);
        }
        if !(self.prediction.locality_scale_km > 0.0) {
            return Err(ConfigError::BadLocalityScale(
                self.prediction.locality_scale_km,
            ));
        }
        if self.cache.max_concurrent_fetches == 0 {
            return Err(ConfigError::ZeroFetchSlots);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn zero_budget_is_rejected() {
        let mut config = Config::default();
        config.cache.capacity_bytes = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroCapacity)));
    }

    #[test]
    fn zero_periods_are_rejected() {
        let mut config = Config::default();
        config.prediction.interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.training.interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [node]
            id = "edge-test"
            cache_root = "/tmp/edgecache-test"

            [cache]
            capacity_bytes = 1000000
            "#,
        )
        .expect("valid TOML");

        assert_eq!(config.node.id, "edge-test");
        assert_eq!(config.cache.capacity_bytes, 1_000_000);
        // Unspecified sections fall back to defaults.
        assert_eq!(config.prediction.interval_secs, 1800);
        assert!(config.prediction.engagement_enabled);
    }
}
