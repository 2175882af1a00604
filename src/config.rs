//! Configuration for corral.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Coordination configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CoordinationConfig {
    /// Directory for the persisted lock and agent tables.
    pub data_dir: PathBuf,
    /// Lock time-to-live in minutes.
    pub lock_ttl_minutes: i64,
    /// Heartbeat age in minutes after which an agent is presumed dead.
    pub stale_after_minutes: i64,
    /// Interval between background reclamation sweeps, in seconds.
    pub sweep_interval_secs: u64,
    /// Whether coordination is enabled (reported in status snapshots).
    pub coordination_enabled: bool,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("corral");

        Self {
            data_dir,
            lock_ttl_minutes: 60,
            stale_after_minutes: 15,
            sweep_interval_secs: 180,
            coordination_enabled: true,
        }
    }
}

impl CoordinationConfig {
    /// Load configuration with fallback chain.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        // Try primary location: ~/.config/corral/corral.yml
        if let Some(config_dir) = dirs::config_dir() {
            let primary_config = config_dir.join("corral").join("corral.yml");
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./corral.yml
        let fallback_config = PathBuf::from("corral.yml");
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.as_ref().display(), e)))?;
        let config: Self = serde_yaml::from_str(&content)?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Lock TTL as a duration.
    pub fn lock_ttl(&self) -> Duration {
        Duration::minutes(self.lock_ttl_minutes)
    }

    /// Heartbeat staleness threshold as a duration.
    pub fn stale_after(&self) -> Duration {
        Duration::minutes(self.stale_after_minutes)
    }

    /// Sweep interval as a std duration, for timers.
    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }
}
