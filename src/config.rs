//! # Configuration Module
//!
//! Data directory setup and the tunable constants of the rotation.
//!
//! ## Data Storage
//!
//! The rotation database and the daemon's PID file live in the
//! platform-standard data directory:
//! - Linux: `~/.local/share/onair/`
//! - macOS: `~/Library/Application Support/onair/`
//! - Windows: `%APPDATA%\onair\`
//!
//! ## Tuning
//!
//! Half-life, boost unit, anti-repeat threshold and history windows are
//! tuned values rather than derived ones, so they are carried in
//! [`RotationConfig`] and can be overridden from a JSON file:
//!
//! ```json
//! {
//!   "weights": { "half_life_ms": 432000000 },
//!   "selection": { "recent_artist_window": 2 }
//! }
//! ```
//!
//! Any field left out keeps its default.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Returns the platform-appropriate data directory for On Air, creating it
/// if it does not exist yet.
///
/// # Errors
///
/// Fails when the system data directory cannot be determined or the `onair`
/// subdirectory cannot be created.
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| anyhow::anyhow!(
            "Could not determine system data directory. Please ensure your platform supports standard data directories."
        ))?;

    let onair_dir = data_dir.join("onair");
    fs::create_dir_all(&onair_dir)
        .with_context(|| format!(
            "Failed to create On Air data directory at {}. Please check file permissions.",
            onair_dir.display()
        ))?;

    Ok(onair_dir)
}

/// Returns the default rotation database path, `<data dir>/rotation.db`.
pub fn get_db_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join("rotation.db"))
}

/// Returns the default config file path, `<data dir>/config.json`.
pub fn get_config_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join("config.json"))
}

/// Decay-weight parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightConfig {
    /// Age at which the recency term has decayed to one half.
    pub half_life_ms: i64,
    /// Boost amount that doubles the boost multiplier.
    pub boost_unit: f64,
    /// Lower bound on any candidate's weight.
    pub weight_floor: f64,
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            half_life_ms: 10 * DAY_MS,
            boost_unit: 0.1,
            weight_floor: 1e-3,
        }
    }
}

/// Anti-repeat and artist-diversity parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Catalogs smaller than this disable filtering when it would exclude everything.
    pub anti_repeat_threshold: usize,
    /// Number of distinct recently played track ids excluded from selection.
    pub recent_track_window: usize,
    /// Number of distinct recently played artists excluded from selection.
    pub recent_artist_window: usize,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            anti_repeat_threshold: 5,
            recent_track_window: 10,
            recent_artist_window: 3,
        }
    }
}

/// Wake-up delivery parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WakeConfig {
    /// Total delivery attempts for one wake-up, the first one included.
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// A wake-up arriving earlier than this before `current_ends_at` is stale.
    pub early_tolerance_ms: i64,
    /// How often the daemon re-reads the wake slot while idle.
    pub idle_poll_ms: u64,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            retry_base_delay_ms: 2_000,
            retry_max_delay_ms: 60_000,
            early_tolerance_ms: 1_000,
            idle_poll_ms: 1_000,
        }
    }
}

/// Complete runtime configuration of one rotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    pub weights: WeightConfig,
    pub selection: SelectionConfig,
    pub wake: WakeConfig,
    /// History entries older than this are pruned.
    pub history_retention_ms: i64,
    /// Default depth of `preview`.
    pub preview_depth: usize,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            weights: WeightConfig::default(),
            selection: SelectionConfig::default(),
            wake: WakeConfig::default(),
            history_retention_ms: DAY_MS,
            preview_depth: 5,
        }
    }
}

/// Load a configuration file, falling back to defaults when it does not exist.
///
/// # Errors
///
/// Fails when the file exists but cannot be read or is not valid JSON.
pub fn load_config(path: &Path) -> Result<RotationConfig> {
    if !path.exists() {
        log::debug!("No config at {}, using defaults", path.display());
        return Ok(RotationConfig::default());
    }

    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Invalid config file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = RotationConfig::default();

        assert_eq!(config.weights.half_life_ms, 864_000_000);
        assert_eq!(config.selection.anti_repeat_threshold, 5);
        assert_eq!(config.selection.recent_track_window, 10);
        assert_eq!(config.selection.recent_artist_window, 3);
        assert_eq!(config.history_retention_ms, 86_400_000);
        assert_eq!(config.preview_depth, 5);
        assert_eq!(config.wake.max_attempts, 6);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = load_config(&temp_dir.path().join("absent.json")).unwrap();

        assert_eq!(config, RotationConfig::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("config.json");
        fs::write(&path, r#"{ "selection": { "recent_artist_window": 2 } }"#).unwrap();

        let config = load_config(&path).unwrap();

        assert_eq!(config.selection.recent_artist_window, 2);
        assert_eq!(config.selection.recent_track_window, 10);
        assert_eq!(config.weights, WeightConfig::default());
        assert_eq!(config.history_retention_ms, 86_400_000);
        assert_eq!(config.preview_depth, 5);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_db_path_structure() {
        let path = get_db_path().expect("Should get valid path");

        assert!(path.to_string_lossy().ends_with("rotation.db"));
        let parent = path.parent().expect("Should have parent directory");
        assert_eq!(parent.file_name().unwrap(), "onair");
    }
}
