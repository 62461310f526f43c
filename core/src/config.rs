//! Settings for port allocation and start-call behavior.
//!
//! Stored in JSON format at `~/.kubeforward/config.json`.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::allocator::{LOCAL_PORT_MAX, LOCAL_PORT_MIN, RESERVED_LOCAL_PORTS};
use crate::error::{Error, Result};

/// Tunable settings for the forwarding subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Lowest local port the allocator will propose.
    #[serde(default = "default_local_port_min")]
    pub local_port_min: u16,

    /// Highest local port the allocator will propose.
    #[serde(default = "default_local_port_max")]
    pub local_port_max: u16,

    /// Local ports the allocator must never propose.
    #[serde(default = "default_reserved_ports")]
    pub reserved_ports: Vec<u16>,

    /// Timeout on the backend start call, in seconds.
    #[serde(default = "default_start_timeout_secs")]
    pub start_timeout_secs: u64,

    /// TTL for cached service lookups, in seconds.
    #[serde(default = "default_service_cache_ttl_secs")]
    pub service_cache_ttl_secs: u64,
}

fn default_local_port_min() -> u16 {
    LOCAL_PORT_MIN
}

fn default_local_port_max() -> u16 {
    LOCAL_PORT_MAX
}

fn default_reserved_ports() -> Vec<u16> {
    RESERVED_LOCAL_PORTS.to_vec()
}

fn default_start_timeout_secs() -> u64 {
    30
}

fn default_service_cache_ttl_secs() -> u64 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            local_port_min: default_local_port_min(),
            local_port_max: default_local_port_max(),
            reserved_ports: default_reserved_ports(),
            start_timeout_secs: default_start_timeout_secs(),
            service_cache_ttl_secs: default_service_cache_ttl_secs(),
        }
    }
}

impl Settings {
    /// The reserved ports as an exclusion set for the allocator.
    pub fn exclusions(&self) -> HashSet<u16> {
        self.reserved_ports.iter().copied().collect()
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }

    pub fn service_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.service_cache_ttl_secs)
    }

    /// Checks internal consistency of the port range.
    pub fn validate(&self) -> Result<()> {
        if self.local_port_min > self.local_port_max {
            return Err(Error::Config(format!(
                "local port range is empty ({} > {})",
                self.local_port_min, self.local_port_max
            )));
        }
        if self.local_port_min < LOCAL_PORT_MIN {
            return Err(Error::Config(format!(
                "local ports below {} are privileged",
                LOCAL_PORT_MIN
            )));
        }
        Ok(())
    }
}

/// Settings store for the forwarding subsystem.
///
/// Handles reading and writing settings to `~/.kubeforward/config.json`.
pub struct SettingsStore {
    config_path: PathBuf,
}

impl SettingsStore {
    /// Create a settings store with the default path.
    ///
    /// Default path: `~/.kubeforward/config.json`
    pub fn new() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?;

        let config_path = home.join(".kubeforward").join("config.json");
        Ok(Self { config_path })
    }

    /// Create a settings store with a custom path (for testing).
    pub fn with_path(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    /// Get the configuration directory path.
    pub fn config_dir(&self) -> Option<PathBuf> {
        self.config_path.parent().map(|p| p.to_path_buf())
    }

    /// Load settings from disk.
    ///
    /// Returns default settings if the file doesn't exist.
    pub async fn load(&self) -> Result<Settings> {
        if !self.config_path.exists() {
            return Ok(Settings::default());
        }

        let content = fs::read_to_string(&self.config_path)
            .await
            .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;

        let settings: Settings = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Save settings to disk.
    ///
    /// Creates the config directory if it doesn't exist. Writes to a
    /// temp file and renames so a crash never leaves a truncated file.
    pub async fn save(&self, settings: &Settings) -> Result<()> {
        settings.validate()?;

        if let Some(config_dir) = self.config_dir() {
            if !config_dir.exists() {
                fs::create_dir_all(&config_dir).await.map_err(|e| {
                    Error::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = serde_json::to_string_pretty(settings)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        let temp_path = self.config_path.with_extension("json.tmp");

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| Error::Config(format!("Failed to create temp config file: {}", e)))?;

        file.write_all(content.as_bytes())
            .await
            .map_err(|e| Error::Config(format!("Failed to write config: {}", e)))?;

        file.sync_all()
            .await
            .map_err(|e| Error::Config(format!("Failed to sync config: {}", e)))?;

        fs::rename(&temp_path, &self.config_path)
            .await
            .map_err(|e| Error::Config(format!("Failed to rename config file: {}", e)))?;

        Ok(())
    }
}
