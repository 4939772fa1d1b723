//! Runtime configuration types.
//!
//! All types deserialize with per-field defaults, so a partial JSON document
//! (or an empty one) yields a usable configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration for the data layer and logging.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// Shared read cache settings.
    pub cache: CacheConfig,
    /// Client initialization and pagination settings.
    pub resources: ResourceConfig,
    /// Log output settings.
    pub logging: LoggingConfig,
}

impl RuntimeConfig {
    /// Parses a JSON configuration document.
    ///
    /// # Errors
    ///
    /// Returns an error if `json` is not valid JSON or a field has the wrong type.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Read cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    /// When false every cache operation is a no-op.
    pub enabled: bool,
    /// Maximum number of live entries. 0 = unlimited.
    pub max_entries: usize,
    /// Maximum total estimated size of live entries in bytes. 0 = unlimited.
    pub max_size_bytes: usize,
    /// Time-to-live of every entry in milliseconds. 0 = entries never expire.
    pub ttl_ms: u64,
    /// Prefix prepended to every key, for sharing one cache between deployments.
    pub key_prefix: String,
}

impl CacheConfig {
    /// A configuration whose cache ignores every operation.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Entry time-to-live, or `None` when entries never expire.
    #[must_use]
    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl_ms > 0).then(|| Duration::from_millis(self.ttl_ms))
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1000,
            max_size_bytes: 50 * 1024 * 1024, // 50 MiB
            ttl_ms: 300_000,
            key_prefix: String::new(),
        }
    }
}

/// Client initialization and pagination configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResourceConfig {
    /// Maximum time a client setup may take in milliseconds. 0 = no limit.
    pub init_timeout_ms: u64,
    /// Default page ceiling for `list`/`index_query` calls that follow all pages.
    pub max_pages: u32,
}

impl ResourceConfig {
    /// Setup time limit, or `None` when setup may take arbitrarily long.
    #[must_use]
    pub fn init_timeout(&self) -> Option<Duration> {
        (self.init_timeout_ms > 0).then(|| Duration::from_millis(self.init_timeout_ms))
    }
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            init_timeout_ms: 10_000,
            max_pages: 10,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable single-line output.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Log output configuration. `RUST_LOG` overrides `directive` when set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// `EnvFilter` directive, e.g. `"info,strata_runtime=debug"`.
    pub directive: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            directive: "info".to_string(),
        }
    }
}
