//! On-disk router configuration.
//!
//! A JSON file in the data directory; missing fields fall back to defaults
//! so old files keep loading after upgrades.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config file is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SettingsError>;

fn default_netid() -> u32 {
    2
}

fn default_bandwidth() -> char {
    'L'
}

fn default_exploratory_hops() -> usize {
    2
}

fn default_exploratory_tunnels() -> usize {
    5
}

fn default_max_transit() -> usize {
    2500
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterSettings {
    /// Where keys, netDb, and profiles live.
    pub data_dir: PathBuf,
    /// Network id; peers on a different one are rejected outright.
    #[serde(default = "default_netid")]
    pub netid: u32,
    /// Advertised bandwidth tier letter (L, O, P, or X).
    #[serde(default = "default_bandwidth")]
    pub bandwidth: char,
    /// Volunteer as a floodfill.
    #[serde(default)]
    pub floodfill: bool,
    #[serde(default = "default_exploratory_hops")]
    pub exploratory_hops: usize,
    #[serde(default = "default_exploratory_tunnels")]
    pub exploratory_tunnels: usize,
    #[serde(default = "default_max_transit")]
    pub max_transit_tunnels: usize,
}

impl RouterSettings {
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            netid: default_netid(),
            bandwidth: default_bandwidth(),
            floodfill: false,
            exploratory_hops: default_exploratory_hops(),
            exploratory_tunnels: default_exploratory_tunnels(),
            max_transit_tunnels: default_max_transit(),
        }
    }

    fn config_path(data_dir: &Path) -> PathBuf {
        data_dir.join("router.config")
    }

    /// Load from `<data_dir>/router.config`, writing defaults on first run.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let path = Self::config_path(data_dir);
        if !path.exists() {
            info!(path = %path.display(), "no config found, writing defaults");
            let settings = Self::with_data_dir(data_dir.to_path_buf());
            settings.save()?;
            return Ok(settings);
        }
        let mut settings: RouterSettings = serde_json::from_str(&fs::read_to_string(&path)?)?;
        settings.data_dir = data_dir.to_path_buf();
        Ok(settings)
    }

    pub fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        let path = Self::config_path(&self.data_dir);
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
