//! Configuration for the offline gateway.
//!
//! Loaded from `~/.carolus-offline/config.json`. A missing file yields the
//! defaults; a malformed one is an error, so a typo cannot silently fall
//! back to a different origin. `CAROLUS_OFFLINE_*` environment variables
//! override individual fields after the file is read.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{OfflineError, Result};

/// Gateway listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Bind address (default: 127.0.0.1).
    pub host: String,
    /// Gateway port.
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

/// Origin server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OriginConfig {
    /// Base URL requests are forwarded to.
    pub url: String,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8080".to_string(),
        }
    }
}

/// On-disk cache settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory for cache snapshots. `None` means `~/.carolus-offline/cache`.
    pub dir: Option<PathBuf>,
}

impl CacheConfig {
    /// Resolved cache directory.
    pub fn dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(default_cache_dir)
    }
}

/// Health server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Whether the health server runs at all.
    pub enabled: bool,
    /// Bind address (default: 127.0.0.1).
    pub host: String,
    /// Health server port.
    pub port: u16,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 9090,
        }
    }
}

/// Install phase retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
    /// Seconds between install attempts.
    pub retry_secs: u64,
    /// Attempt cap; 0 retries forever.
    pub max_attempts: u64,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            retry_secs: 30,
            max_attempts: 0,
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Emit JSON log lines instead of the human-readable format.
    pub json: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub origin: OriginConfig,
    pub cache: CacheConfig,
    pub health: HealthConfig,
    pub install: InstallConfig,
    pub log: LogConfig,
}

fn default_cache_dir() -> PathBuf {
    Config::dir().join("cache")
}

impl Config {
    /// Base data directory: `~/.carolus-offline`.
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".carolus-offline")
    }

    /// Canonical config file path: `~/.carolus-offline/config.json`.
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load from the canonical path, then apply env overrides.
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::path())
    }

    /// Load from an explicit path.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
                OfflineError::Config(format!("Failed to parse {}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                return Err(OfflineError::Config(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("CAROLUS_OFFLINE_ORIGIN_URL") {
            self.origin.url = url;
        }
        if let Ok(host) = std::env::var("CAROLUS_OFFLINE_GATEWAY_HOST") {
            self.gateway.host = host;
        }
        if let Ok(port) = std::env::var("CAROLUS_OFFLINE_GATEWAY_PORT") {
            match port.parse() {
                Ok(port) => self.gateway.port = port,
                Err(_) => {
                    warn!(value = %port, "Ignoring unparseable CAROLUS_OFFLINE_GATEWAY_PORT")
                }
            }
        }
        if let Ok(dir) = std::env::var("CAROLUS_OFFLINE_CACHE_DIR") {
            self.cache.dir = Some(PathBuf::from(dir));
        }
        if let Ok(port) = std::env::var("CAROLUS_OFFLINE_HEALTH_PORT") {
            match port.parse() {
                Ok(port) => self.health.port = port,
                Err(_) => {
                    warn!(value = %port, "Ignoring unparseable CAROLUS_OFFLINE_HEALTH_PORT")
                }
            }
        }
    }
}
