//! Host configuration (config.toml in the platform config directory).
//!
//! Settings are stored in TOML format. Loading is forgiving: a missing or
//! unparseable file falls back to defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Host configuration.
///
/// All user-configurable settings, organized into sections and serialized
/// to/from TOML for persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct HostConfig {
    /// Rewind recording settings
    #[serde(default)]
    pub rewind: RewindConfig,
    /// Savestate settings
    #[serde(default)]
    pub savestates: SavestateConfig,
}

/// Rewind recording configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewindConfig {
    /// Whether to record frame history at all (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Maximum frames of history to keep (default: 600, ten seconds at 60fps)
    #[serde(default = "default_max_frames")]
    pub max_frames: usize,
}

/// Savestate configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavestateConfig {
    /// Directory savestates are written to; `None` uses the platform data
    /// directory (default: None)
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}
fn default_max_frames() -> usize {
    600
}

impl Default for RewindConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            max_frames: default_max_frames(),
        }
    }
}

impl Default for SavestateConfig {
    fn default() -> Self {
        Self { directory: None }
    }
}

/// Returns the platform-specific configuration directory.
///
/// Returns `None` if the home directory cannot be determined.
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("io.corewind", "", "Corewind")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Returns the platform-specific data directory, where savestates land by
/// default.
pub fn data_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("io.corewind", "", "Corewind")
        .map(|dirs| dirs.data_dir().to_path_buf())
}

/// Loads the configuration from disk.
///
/// Reads `config.toml` from the platform's configuration directory.
/// Returns default values if the file doesn't exist or cannot be parsed.
pub fn load() -> HostConfig {
    config_dir()
        .and_then(|dir| std::fs::read_to_string(dir.join("config.toml")).ok())
        .and_then(|content| toml::from_str(&content).ok())
        .unwrap_or_default()
}

/// Saves the configuration to disk, creating the config directory if it
/// doesn't exist.
pub fn save(config: &HostConfig) -> std::io::Result<()> {
    if let Some(dir) = config_dir() {
        std::fs::create_dir_all(&dir)?;
        let content = toml::to_string_pretty(config).unwrap();
        std::fs::write(dir.join("config.toml"), content)?;
    }
    Ok(())
}
