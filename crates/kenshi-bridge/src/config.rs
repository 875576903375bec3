//! Bridge configuration.
//!
//! ```ignore
//! use kenshi_bridge::BridgeConfig;
//!
//! let config = BridgeConfig::builder()
//!     .custom_server("https://example.org/offsets.json")
//!     .game_version("1.0.64")
//!     .allow_pattern_scan(false)
//!     .build();
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::offset::{DEFAULT_CACHE_FILE, DEFAULT_MAX_AGE};

pub const DEFAULT_SERVERS: &[&str] = &[
    "https://raw.githubusercontent.com/The404Studios/Kenshi-Online/main/offsets/kenshi_offsets.json",
    "https://kenshi-online.the404studios.com/api/offsets",
];

/// Configuration for offset resolution and the sync worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Offset servers, tried in order
    pub servers: Vec<String>,
    /// Binary offset cache location
    pub cache_path: PathBuf,
    pub cache_max_age_days: u64,
    /// Host build to request offsets for; empty accepts any
    pub game_version: String,
    /// Try the remote table before scanning
    pub prefer_remote: bool,
    pub allow_pattern_scan: bool,
    pub http_timeout_secs: u64,
    /// Worker cadence
    pub sync_interval_ms: u64,
    /// Remote-entity smoothing window
    pub interpolation_window_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            servers: DEFAULT_SERVERS.iter().map(|s| s.to_string()).collect(),
            cache_path: PathBuf::from(DEFAULT_CACHE_FILE),
            cache_max_age_days: DEFAULT_MAX_AGE.as_secs() / (24 * 60 * 60),
            game_version: String::new(),
            prefer_remote: true,
            allow_pattern_scan: true,
            http_timeout_secs: 10,
            sync_interval_ms: 50,
            interpolation_window_ms: 100,
        }
    }
}

impl BridgeConfig {
    /// Create a new configuration builder
    pub fn builder() -> BridgeConfigBuilder {
        BridgeConfigBuilder::default()
    }

    pub fn cache_max_age(&self) -> Duration {
        Duration::from_secs(self.cache_max_age_days.saturating_mul(24 * 60 * 60))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn interpolation_window(&self) -> Duration {
        Duration::from_millis(self.interpolation_window_ms)
    }

    /// Requested host version, `None` when any version is acceptable
    pub fn requested_version(&self) -> Option<&str> {
        Some(self.game_version.as_str()).filter(|v| !v.is_empty())
    }
}

/// Builder for BridgeConfig
#[derive(Debug, Clone, Default)]
pub struct BridgeConfigBuilder {
    custom_server: Option<String>,
    servers: Option<Vec<String>>,
    cache_path: Option<PathBuf>,
    cache_max_age_days: Option<u64>,
    game_version: Option<String>,
    prefer_remote: Option<bool>,
    allow_pattern_scan: Option<bool>,
    http_timeout_secs: Option<u64>,
    sync_interval_ms: Option<u64>,
    interpolation_window_ms: Option<u64>,
}

impl BridgeConfigBuilder {
    /// Add a server that is tried before the defaults
    pub fn custom_server<S: Into<String>>(mut self, url: S) -> Self {
        self.custom_server = Some(url.into());
        self
    }

    /// Replace the server list
    pub fn servers<I, S>(mut self, servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.servers = Some(servers.into_iter().map(Into::into).collect());
        self
    }

    pub fn cache_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    pub fn cache_max_age_days(mut self, days: u64) -> Self {
        self.cache_max_age_days = Some(days);
        self
    }

    pub fn game_version<S: Into<String>>(mut self, version: S) -> Self {
        self.game_version = Some(version.into());
        self
    }

    pub fn prefer_remote(mut self, enabled: bool) -> Self {
        self.prefer_remote = Some(enabled);
        self
    }

    pub fn allow_pattern_scan(mut self, enabled: bool) -> Self {
        self.allow_pattern_scan = Some(enabled);
        self
    }

    pub fn http_timeout_secs(mut self, secs: u64) -> Self {
        self.http_timeout_secs = Some(secs);
        self
    }

    pub fn sync_interval_ms(mut self, ms: u64) -> Self {
        self.sync_interval_ms = Some(ms);
        self
    }

    pub fn interpolation_window_ms(mut self, ms: u64) -> Self {
        self.interpolation_window_ms = Some(ms);
        self
    }

    /// Build the configuration
    pub fn build(self) -> BridgeConfig {
        let default = BridgeConfig::default();
        let mut servers = self.servers.unwrap_or(default.servers);
        if let Some(custom) = self.custom_server {
            servers.retain(|s| *s != custom);
            servers.insert(0, custom);
        }

        BridgeConfig {
            servers,
            cache_path: self.cache_path.unwrap_or(default.cache_path),
            cache_max_age_days: self.cache_max_age_days.unwrap_or(default.cache_max_age_days),
            game_version: self.game_version.unwrap_or(default.game_version),
            prefer_remote: self.prefer_remote.unwrap_or(default.prefer_remote),
            allow_pattern_scan: self.allow_pattern_scan.unwrap_or(default.allow_pattern_scan),
            http_timeout_secs: self.http_timeout_secs.unwrap_or(default.http_timeout_secs),
            sync_interval_ms: self.sync_interval_ms.unwrap_or(default.sync_interval_ms),
            interpolation_window_ms: self
                .interpolation_window_ms
                .unwrap_or(default.interpolation_window_ms),
        }
    }
}
