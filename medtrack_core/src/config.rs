//! Configuration file support for Medtrack.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/medtrack/config.toml`.

use crate::catalog::{default_global_limits, default_medications};
use crate::{Error, GlobalLimit, MedicationRule, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Timeline width used when a dose has no configured active duration
pub const DEFAULT_WIDTH_HOURS: f64 = 1.0;

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub input: InputColumns,

    #[serde(default)]
    pub timeline: TimelineConfig,

    #[serde(default = "default_medications")]
    pub medications: Vec<MedicationRule>,

    #[serde(default = "default_global_limits")]
    pub global_limits: Vec<GlobalLimit>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input: InputColumns::default(),
            timeline: TimelineConfig::default(),
            medications: default_medications(),
            global_limits: default_global_limits(),
        }
    }
}

/// Column names read from each log row
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InputColumns {
    #[serde(default = "default_timestamp_column")]
    pub timestamp_column: String,

    #[serde(default = "default_medication_column")]
    pub medication_column: String,
}

impl Default for InputColumns {
    fn default() -> Self {
        Self {
            timestamp_column: default_timestamp_column(),
            medication_column: default_medication_column(),
        }
    }
}

/// Timeline rendering parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimelineConfig {
    #[serde(default = "default_width_hours")]
    pub default_width_hours: f64,

    #[serde(default = "default_lookback_hours")]
    pub lookback_hours: f64,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            default_width_hours: default_width_hours(),
            lookback_hours: default_lookback_hours(),
        }
    }
}

// Default value functions
fn default_timestamp_column() -> String {
    "Timestamp (Calculated)".into()
}

fn default_medication_column() -> String {
    "💊💊 Medicine Taken:".into()
}

fn default_width_hours() -> f64 {
    DEFAULT_WIDTH_HOURS
}

fn default_lookback_hours() -> f64 {
    24.0
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_path
            );
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        tracing::info!(
            "Loaded config from {:?} ({} medications, {} global limits)",
            path,
            config.medications.len(),
            config.global_limits.len()
        );
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> Result<PathBuf> {
        let base = dirs::config_dir()
            .ok_or_else(|| Error::Config("Unable to determine config directory".into()))?;
        Ok(base.join("medtrack").join("config.toml"))
    }

    /// Save the current configuration to the default path
    pub fn save(&self) -> Result<()> {
        let config_path = Self::default_config_path()?;
        self.save_to(&config_path)
    }

    /// Save the current configuration to a specific path
    ///
    /// Writes to a temporary file in the same directory and renames it into
    /// place, so a crash never leaves a half-written config behind.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent)?;

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        let mut tmp = NamedTempFile::new_in(&parent)?;
        tmp.write_all(contents.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| Error::Io(e.error))?;

        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(!config.medications.is_empty());
        assert_eq!(config.input.timestamp_column, "Timestamp (Calculated)");
        assert_eq!(config.input.medication_column, "💊💊 Medicine Taken:");
        assert_eq!(config.timeline.default_width_hours, DEFAULT_WIDTH_HOURS);
    }

    #[test]
    fn test_config_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.medications, parsed.medications);
        assert_eq!(config.global_limits, parsed.global_limits);
        assert_eq!(
            config.timeline.lookback_hours,
            parsed.timeline.lookback_hours
        );
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
[timeline]
lookback_hours = 48.0
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.timeline.lookback_hours, 48.0);
        assert_eq!(config.timeline.default_width_hours, 1.0); // default
        assert_eq!(config.medications, default_medications());
    }

    #[test]
    fn test_medication_rule_from_toml() {
        let toml_str = r#"
[[medications]]
name = "Ibuprofen"
aliases = ["Advil"]

[medications.amount_parser]
patterns = ['Ibuprofen\s+(\d+)mg']

[[medications.constraints]]
window_hours = 4.0
max_amount = 1200.0
unit = "mg"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.medications.len(), 1);
        let rule = &config.medications[0];
        assert_eq!(rule.aliases, vec!["Advil".to_string()]);
        assert_eq!(rule.amount_parser.amount_group, 1);
        assert_eq!(rule.amount_parser.unit, "mg");
        assert_eq!(rule.amount_parser.multiplier, None);
        assert_eq!(rule.constraints[0].max_amount, 1200.0);
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.timeline.lookback_hours = 12.0;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.timeline.lookback_hours, 12.0);
        assert_eq!(loaded.medications, config.medications);
    }
}
