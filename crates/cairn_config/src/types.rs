//! Configuration types deserialized from `cairn.toml`.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// The top-level configuration parsed from `cairn.toml`.
///
/// Every section is optional; an empty file yields [`CairnConfig::default`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CairnConfig {
    /// Cache store settings.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Freshness probe settings.
    #[serde(default)]
    pub probe: ProbeConfig,
}

/// Where and how materialized artifacts are stored.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Root directory for artifacts and the cache manifest. Relative paths
    /// are resolved against the directory holding `cairn.toml`.
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
    /// Whether artifact payloads are gzip-compressed on disk.
    #[serde(default)]
    pub compress: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            compress: false,
        }
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".cairn-cache")
}

/// Settings for probes that reach remote sources.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProbeConfig {
    /// Timeout for metadata-only HTTP requests, in seconds.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    /// `User-Agent` header sent with HTTP probes.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl ProbeConfig {
    /// Returns the HTTP timeout as a [`Duration`].
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            http_timeout_secs: default_http_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_http_timeout_secs() -> u64 {
    10
}

fn default_user_agent() -> String {
    concat!("cairn/", env!("CARGO_PKG_VERSION")).to_string()
}
