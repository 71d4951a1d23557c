use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::error::DispatchError;

/// Global configuration loaded from `~/.config/laneq/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Number of processing lanes.
    pub lanes: usize,
    /// Concurrency cap per lane.
    pub lane_concurrency: usize,
    /// Timeout applied to jobs submitted without one, in milliseconds.
    pub default_timeout_ms: u64,
    /// Period of the persistence flush loop, in milliseconds.
    pub flush_interval_ms: u64,
    /// Maximum transitions persisted per flush cycle.
    pub flush_batch_size: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            lanes: 4,
            lane_concurrency: 4,
            default_timeout_ms: 30_000,
            flush_interval_ms: 500,
            flush_batch_size: 64,
        }
    }
}

impl DispatcherConfig {
    /// Reject configurations no lane set can be built from.
    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.lanes == 0 {
            return Err(DispatchError::InvalidLaneCount(0));
        }
        if self.lane_concurrency == 0 {
            return Err(DispatchError::InvalidConcurrency(0));
        }
        Ok(())
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("laneq")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<DispatcherConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = DispatcherConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: DispatcherConfig = toml::from_str(&data)?;
    Ok(cfg)
}
