// src/config.rs

//! Manages proxy configuration: loading, environment overrides, and validation.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use tracing::{info, warn};
use url::Url;

/// Environment variable that overrides `api_key`.
pub const API_KEY_ENV: &str = "GEOCACHE_API_KEY";
/// Environment variable that overrides `store.password`.
pub const STORE_PASSWORD_ENV: &str = "GEOCACHE_STORE_PASSWORD";
/// Upper bound for the cache TTLs: ten years.
pub const MAX_EXPIRE_SECONDS: u64 = 10 * 365 * 24 * 60 * 60;

/// Which [`crate::core::store::KvStore`] implementation backs the cache.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// A RESP (Redis protocol) server.
    #[default]
    Resp,
    /// Process memory. Nothing survives a restart.
    Memory,
}

/// Reconnection policy for the store connection.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    #[serde(default = "default_reconnect_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Upper bound on the total time spent sleeping between attempts.
    #[serde(default = "default_max_total_backoff_ms")]
    pub max_total_backoff_ms: u64,
}

fn default_reconnect_attempts() -> u32 {
    10
}
fn default_initial_delay_ms() -> u64 {
    100
}
fn default_max_delay_ms() -> u64 {
    3_000
}
fn default_max_total_backoff_ms() -> u64 {
    30_000
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_reconnect_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_total_backoff_ms: default_max_total_backoff_ms(),
        }
    }
}

/// Connection parameters for the key-value store.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_store_host")]
    pub host: String,
    #[serde(default = "default_store_port")]
    pub port: u16,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default)]
    pub database: u32,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

fn default_store_host() -> String {
    "127.0.0.1".to_string()
}
fn default_store_port() -> u16 {
    6379
}
fn default_pool_size() -> usize {
    16
}
fn default_io_timeout_ms() -> u64 {
    2_000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            host: default_store_host(),
            port: default_store_port(),
            password: None,
            database: 0,
            pool_size: default_pool_size(),
            io_timeout_ms: default_io_timeout_ms(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// TTL policy for cached upstream responses.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// TTL for `OK` responses, also applied on every cache hit.
    #[serde(default = "default_expire_seconds")]
    pub expire_seconds: u64,
    /// TTL for `ZERO_RESULTS` responses.
    #[serde(default = "default_short_expire_seconds")]
    pub short_expire_seconds: u64,
}

fn default_expire_seconds() -> u64 {
    60 * 60 * 24 * 30 // 30 days
}
fn default_short_expire_seconds() -> u64 {
    60 * 60 * 24 // 1 day
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            expire_seconds: default_expire_seconds(),
            short_expire_seconds: default_short_expire_seconds(),
        }
    }
}

/// Where cache misses are forwarded.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UpstreamConfig {
    /// Scheme and host of the upstream API, without a trailing slash.
    #[serde(default = "default_upstream_base")]
    pub base_url: String,
    #[serde(default = "default_upstream_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_upstream_base() -> String {
    "https://maps.googleapis.com".to_string()
}
fn default_upstream_timeout_ms() -> u64 {
    10_000
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_upstream_base(),
            timeout_ms: default_upstream_timeout_ms(),
        }
    }
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct MetricsConfig {
    /// If true, process metrics are served on `/prometheus`.
    #[serde(default)]
    pub enabled: bool,
}

/// A raw representation of the config file before overrides and validation.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default = "default_namespace")]
    namespace: String,
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    cache: CacheConfig,
    #[serde(default)]
    upstream: UpstreamConfig,
    #[serde(default)]
    store: StoreConfig,
    #[serde(default)]
    metrics: MetricsConfig,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8851
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_namespace() -> String {
    "geocache".to_string()
}

/// The final, validated proxy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    /// Prefix for every canonical cache key and metric hash.
    pub namespace: String,
    /// Default upstream credential, used when the caller supplies none.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            namespace: default_namespace(),
            api_key: None,
            cache: CacheConfig::default(),
            upstream: UpstreamConfig::default(),
            store: StoreConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new `Config` by reading and parsing a TOML file, then applying
    /// environment overrides.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let mut config = Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse TOML from '{path}'"))?;
        config.apply_env_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML document without touching the environment or validating.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(contents)?;
        Ok(Config {
            host: raw.host,
            port: raw.port,
            log_level: raw.log_level,
            namespace: raw.namespace,
            api_key: raw.api_key.filter(|k| !k.is_empty()),
            cache: raw.cache,
            upstream: raw.upstream,
            store: raw.store,
            metrics: raw.metrics,
        })
    }

    /// Secrets are usually injected through the environment rather than the file.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup(API_KEY_ENV).filter(|k| !k.is_empty()) {
            info!("Using upstream API key from {API_KEY_ENV}");
            self.api_key = Some(key);
        }
        if let Some(password) = lookup(STORE_PASSWORD_ENV).filter(|p| !p.is_empty()) {
            self.store.password = Some(password);
        }
    }

    /// Validates the resolved configuration for logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("port cannot be 0"));
        }
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }
        if self.namespace.trim().is_empty() {
            return Err(anyhow!("namespace cannot be empty"));
        }
        if self.cache.expire_seconds == 0 {
            return Err(anyhow!("cache.expire_seconds cannot be 0"));
        }
        if self.cache.short_expire_seconds == 0 {
            return Err(anyhow!("cache.short_expire_seconds cannot be 0"));
        }
        for (name, secs) in [
            ("cache.expire_seconds", self.cache.expire_seconds),
            ("cache.short_expire_seconds", self.cache.short_expire_seconds),
        ] {
            if secs > MAX_EXPIRE_SECONDS {
                return Err(anyhow!(
                    "{name} ({secs}) exceeds the maximum of {MAX_EXPIRE_SECONDS} seconds"
                ));
            }
        }
        if self.cache.short_expire_seconds > self.cache.expire_seconds {
            warn!(
                "cache.short_expire_seconds ({}) is longer than cache.expire_seconds ({})",
                self.cache.short_expire_seconds, self.cache.expire_seconds
            );
        }

        let base = Url::parse(&self.upstream.base_url)
            .with_context(|| format!("Invalid upstream.base_url '{}'", self.upstream.base_url))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(anyhow!("upstream.base_url must use http or https"));
        }
        if self.upstream.base_url.ends_with('/') {
            return Err(anyhow!("upstream.base_url must not end with '/'"));
        }
        if self.upstream.timeout_ms == 0 {
            return Err(anyhow!("upstream.timeout_ms cannot be 0"));
        }

        if self.store.backend == StoreBackend::Resp {
            if self.store.host.trim().is_empty() {
                return Err(anyhow!("store.host cannot be empty"));
            }
            if self.store.port == 0 {
                return Err(anyhow!("store.port cannot be 0"));
            }
            if self.store.pool_size == 0 {
                return Err(anyhow!("store.pool_size cannot be 0"));
            }
            if self.store.io_timeout_ms == 0 {
                return Err(anyhow!("store.io_timeout_ms cannot be 0"));
            }
            if self.store.reconnect.max_attempts == 0 {
                return Err(anyhow!("store.reconnect.max_attempts cannot be 0"));
            }
        } else {
            warn!("Using the in-memory store backend; cached entries will not survive a restart.");
        }

        if self.api_key.is_none() {
            warn!("No default api_key configured; callers must supply their own 'key' parameter.");
        }
        Ok(())
    }
}
