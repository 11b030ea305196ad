//! Configuration management for callmeter
//!
//! Parses TOML configuration files and provides typed access to settings.
//! Every section is optional; an empty file yields the defaults.

use crate::client::UrlMapper;
use crate::client::dispatcher::{DEFAULT_MAX_REQUESTS, DEFAULT_MAX_REQUESTS_PER_HOST};
use crate::error::{AppError, AppResult};
use crate::metrics::distribution::{DEFAULT_DURATION_BUCKETS, DEFAULT_PERCENTILES};
use crate::metrics::{DistributionConfig, Tags, names};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9464
}

/// Meter naming and tagging
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Prefix of every meter name
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Tags added to every meter
    #[serde(default)]
    pub extra_tags: BTreeMap<String, String>,
    /// Tag request timers with the destination host
    #[serde(default = "default_include_host_tag")]
    pub include_host_tag: bool,
    #[serde(default)]
    pub url_mapper: UrlMapper,
    /// Request headers whose values become request timer tags
    #[serde(default)]
    pub request_tag_keys: Vec<String>,
    #[serde(default = "default_percentiles")]
    pub percentiles: Vec<f64>,
    #[serde(default = "default_duration_buckets")]
    pub duration_buckets_seconds: Vec<f64>,
}

impl MetricsConfig {
    pub fn tags(&self) -> Tags {
        Tags::from(&self.extra_tags)
    }

    pub fn durations(&self) -> DistributionConfig {
        DistributionConfig::new(
            self.duration_buckets_seconds.clone(),
            self.percentiles.clone(),
        )
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            extra_tags: BTreeMap::new(),
            include_host_tag: default_include_host_tag(),
            url_mapper: UrlMapper::default(),
            request_tag_keys: Vec::new(),
            percentiles: default_percentiles(),
            duration_buckets_seconds: default_duration_buckets(),
        }
    }
}

fn default_prefix() -> String {
    names::DEFAULT_PREFIX.to_string()
}

fn default_include_host_tag() -> bool {
    true
}

fn default_percentiles() -> Vec<f64> {
    DEFAULT_PERCENTILES.to_vec()
}

fn default_duration_buckets() -> Vec<f64> {
    DEFAULT_DURATION_BUCKETS.to_vec()
}

/// HTTP client settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_pool_idle_timeout")]
    pub pool_idle_timeout_seconds: u64,
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,
    #[serde(default = "default_max_requests_per_host")]
    pub max_requests_per_host: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_seconds: default_connect_timeout(),
            request_timeout_seconds: default_request_timeout(),
            pool_idle_timeout_seconds: default_pool_idle_timeout(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
            max_requests: default_max_requests(),
            max_requests_per_host: default_max_requests_per_host(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    30
}

fn default_pool_idle_timeout() -> u64 {
    90
}

fn default_pool_max_idle_per_host() -> usize {
    5
}

fn default_max_requests() -> usize {
    DEFAULT_MAX_REQUESTS
}

fn default_max_requests_per_host() -> usize {
    DEFAULT_MAX_REQUESTS_PER_HOST
}

fn default_user_agent() -> String {
    concat!("callmeter/", env!("CARGO_PKG_VERSION")).to_string()
}

/// Observability configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path_display = path.as_ref().display().to_string();

        // Phase 1: Read file (preserves io::Error context)
        let content =
            std::fs::read_to_string(path.as_ref()).map_err(|source| AppError::ConfigFileRead {
                path: path_display.clone(),
                source,
            })?;

        // Phase 2: Parse TOML (preserves toml::de::Error context)
        let config: Self = toml::from_str(&content).map_err(|source| AppError::ConfigParseFailed {
            path: path_display.clone(),
            source,
        })?;

        // Phase 3: Validate parsed config (provides contextual reason)
        config
            .validate()
            .map_err(|e| AppError::ConfigValidationFailed {
                path: path_display,
                reason: e.to_string(),
            })?;

        Ok(config)
    }

    /// Validate configuration after parsing
    ///
    /// This is called automatically by `from_file()` and `from_str()`, but can
    /// also be called explicitly when constructing Config in code.
    pub fn validate(&self) -> AppResult<()> {
        let metrics = &self.metrics;

        if metrics.prefix.trim().is_empty() {
            return Err(AppError::Config(
                "metrics.prefix must not be empty".to_string(),
            ));
        }
        if metrics.prefix.starts_with('.') || metrics.prefix.ends_with('.') {
            return Err(AppError::Config(format!(
                "metrics.prefix '{}' must not start or end with '.'",
                metrics.prefix
            )));
        }

        for key in metrics.extra_tags.keys().chain(&metrics.request_tag_keys) {
            if key.trim().is_empty() {
                return Err(AppError::Config(
                    "metrics tag keys must not be empty".to_string(),
                ));
            }
        }

        for reserved in ["method", "uri", "status", "outcome", "host"] {
            if metrics.request_tag_keys.iter().any(|k| k == reserved) {
                return Err(AppError::Config(format!(
                    "metrics.request_tag_keys must not contain the reserved tag '{reserved}'"
                )));
            }
        }

        if let Some(q) = metrics
            .percentiles
            .iter()
            .find(|q| !q.is_finite() || **q <= 0.0 || **q > 1.0)
        {
            return Err(AppError::Config(format!(
                "metrics.percentiles must lie in (0, 1], got {q}"
            )));
        }

        let buckets = &metrics.duration_buckets_seconds;
        if buckets.is_empty() {
            return Err(AppError::Config(
                "metrics.duration_buckets_seconds must contain at least one bound".to_string(),
            ));
        }
        if buckets.iter().any(|b| !b.is_finite() || *b <= 0.0) {
            return Err(AppError::Config(
                "metrics.duration_buckets_seconds must be positive finite numbers".to_string(),
            ));
        }
        if buckets.windows(2).any(|w| w[0] >= w[1]) {
            return Err(AppError::Config(
                "metrics.duration_buckets_seconds must be strictly increasing".to_string(),
            ));
        }

        let client = &self.client;
        if client.connect_timeout_seconds == 0 || client.request_timeout_seconds == 0 {
            return Err(AppError::Config(
                "client timeouts must be greater than 0".to_string(),
            ));
        }
        if client.request_timeout_seconds > 300 {
            return Err(AppError::Config(format!(
                "client.request_timeout_seconds cannot exceed 300 seconds (5 minutes), got {}",
                client.request_timeout_seconds
            )));
        }
        if client.max_requests == 0 || client.max_requests_per_host == 0 {
            return Err(AppError::Config(
                "client.max_requests and client.max_requests_per_host must be at least 1"
                    .to_string(),
            ));
        }
        if client.max_requests_per_host > client.max_requests {
            return Err(AppError::Config(format!(
                "client.max_requests_per_host ({}) cannot exceed client.max_requests ({})",
                client.max_requests_per_host, client.max_requests
            )));
        }

        Ok(())
    }
}

impl FromStr for Config {
    type Err = AppError;

    fn from_str(toml_str: &str) -> Result<Self, Self::Err> {
        let config: Config =
            toml::from_str(toml_str).map_err(|source| AppError::ConfigParseFailed {
                path: "<string>".to_string(),
                source,
            })?;

        // Validate config before returning
        config.validate()?;
        Ok(config)
    }
}
