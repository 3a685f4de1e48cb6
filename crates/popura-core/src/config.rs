//! Configuration system for Popura.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $POPURA_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/popura/config.toml
//!   3. ~/.config/popura/config.toml
//!
//! A config is always replaced as a whole. Modules receive a fresh copy on
//! `update_config` and rebuild from it; nothing patches individual fields of
//! a running module.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PopuraConfig {
    pub node: NodeConfig,
    pub autopeering: AutoPeeringConfig,
    pub radv: RAdvConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Hex-encoded ed25519 public key. Empty = generate an ephemeral one.
    pub public_key: String,
    /// Peer URIs dialled at startup, e.g. "tcp://203.0.113.7:4000".
    pub peers: Vec<String>,
    /// Loopback port for the admin API. 0 = disabled.
    pub admin_port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoPeeringConfig {
    pub enable: bool,
    /// How long the node may go without a non-link-local peer before a new
    /// one is requested.
    pub timeout_secs: u64,
    /// Delay between peer table checks.
    pub poll_interval_secs: u64,
    /// How many of the lowest-latency catalog peers to choose from.
    pub max_candidates: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RAdvConfig {
    pub enable: bool,
    /// Interface to advertise on.
    pub interface: String,
    /// Add <subnet>::1/64 to the interface while advertising.
    pub set_gateway_ip: bool,
    /// Announce this node as the default router instead of a mesh-only route.
    pub advertise_default_router: bool,
    /// Include an RDNSS option pointing at the interface address.
    pub advertise_dns: bool,
    /// Lower bound of the unsolicited advertisement interval.
    pub min_interval_secs: u64,
    /// Upper bound of the unsolicited advertisement interval.
    pub max_interval_secs: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            public_key: String::new(),
            peers: Vec::new(),
            admin_port: 9101,
        }
    }
}

impl Default for AutoPeeringConfig {
    fn default() -> Self {
        Self {
            enable: false,
            timeout_secs: 60,
            poll_interval_secs: 10,
            max_candidates: 10,
        }
    }
}

impl Default for RAdvConfig {
    fn default() -> Self {
        Self {
            enable: false,
            interface: String::new(),
            set_gateway_ip: false,
            advertise_default_router: false,
            advertise_dns: false,
            min_interval_secs: 200,
            max_interval_secs: 600,
        }
    }
}

impl AutoPeeringConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl RAdvConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_secs)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_secs(self.max_interval_secs)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("popura")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl PopuraConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::file_path())?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from an explicit path. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(PopuraConfig::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("POPURA_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            PopuraConfig::default().write_to(&path)?;
        }
        Ok(path)
    }

    /// Serialize this config to `path`, creating parent directories.
    pub fn write_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        let text = self.to_toml()?;
        std::fs::write(path, text).map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::SerializeFailed)
    }

    /// Decode `node.public_key`. `Ok(None)` when unset.
    pub fn public_key(&self) -> Result<Option<[u8; 32]>, ConfigError> {
        if self.node.public_key.is_empty() {
            return Ok(None);
        }
        let bytes = hex::decode(&self.node.public_key)
            .map_err(|e| ConfigError::Invalid(format!("node.public_key: {e}")))?;
        let key: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            ConfigError::Invalid(format!("node.public_key: expected 32 bytes, got {}", b.len()))
        })?;
        Ok(Some(key))
    }

    /// Reject settings no module could run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.public_key()?;
        if self.radv.enable && self.radv.interface.is_empty() {
            return Err(ConfigError::Invalid(
                "radv.enable requires radv.interface".to_string(),
            ));
        }
        if self.radv.min_interval_secs > self.radv.max_interval_secs {
            return Err(ConfigError::Invalid(format!(
                "radv.min_interval_secs ({}) exceeds radv.max_interval_secs ({})",
                self.radv.min_interval_secs, self.radv.max_interval_secs
            )));
        }
        if self.autopeering.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "autopeering.poll_interval_secs must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply POPURA_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("POPURA_RADV__INTERFACE") {
            self.radv.interface = v;
        }
        if let Ok(v) = std::env::var("POPURA_RADV__ENABLE") {
            self.radv.enable = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("POPURA_AUTOPEERING__ENABLE") {
            self.autopeering.enable = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("POPURA_NODE__ADMIN_PORT") {
            if let Ok(p) = v.parse() {
                self.node.admin_port = p;
            }
        }
    }
}
