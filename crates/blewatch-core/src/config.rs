//! Engine configuration.
//!
//! Loaded from TOML; every section and field is optional:
//!
//! ```toml
//! [store]
//! history_cap = 120
//! rate_interval_ms = 1000
//!
//! [replay]
//! playback_rate = 1.0
//! loop_playback = false
//!
//! [recorder]
//! max_records = 10000
//!
//! [query]
//! min_rssi = -100
//! filter_text = ""
//! filter_field = "name"
//! sort_key = "rssi"
//! sort_order = "desc"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use blewatch_types::DEFAULT_HISTORY_CAP;

use crate::filter::{DEFAULT_MIN_RSSI, FilterField, QueryConfig, SortKey, SortOrder};
use crate::recorder::DEFAULT_MAX_RECORDS;
use crate::scheduler::ReplayOptions;
use crate::store::StoreOptions;

/// Engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Device store settings.
    pub store: StoreConfig,
    /// Replay settings.
    pub replay: ReplayConfig,
    /// Recorder settings.
    pub recorder: RecorderConfig,
    /// Default query.
    pub query: QuerySection,
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// A missing file yields the defaults.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file, creating parent directories.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path, content).map_err(|e| ConfigError::Write {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration, collecting every field error.
    ///
    /// ```
    /// use blewatch_core::Config;
    ///
    /// Config::default().validate().expect("defaults are valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.store.validate());
        errors.extend(self.replay.validate());
        errors.extend(self.recorder.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// Minimum decoded history cap.
pub const MIN_HISTORY_CAP: usize = 1;
/// Maximum decoded history cap.
pub const MAX_HISTORY_CAP: usize = 10_000;
/// Minimum rate tick interval in milliseconds.
pub const MIN_RATE_INTERVAL_MS: u64 = 100;
/// Maximum rate tick interval in milliseconds (1 minute).
pub const MAX_RATE_INTERVAL_MS: u64 = 60_000;
/// Maximum playback rate.
pub const MAX_PLAYBACK_RATE: f64 = 100.0;

/// Device store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Samples kept per decoded history series.
    pub history_cap: usize,
    /// Rate sampling interval in milliseconds.
    pub rate_interval_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            history_cap: DEFAULT_HISTORY_CAP,
            rate_interval_ms: 1000,
        }
    }
}

impl StoreConfig {
    /// Validate store settings.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if !(MIN_HISTORY_CAP..=MAX_HISTORY_CAP).contains(&self.history_cap) {
            errors.push(ValidationError {
                field: "store.history_cap".to_string(),
                message: format!(
                    "history cap {} is out of range ({}-{})",
                    self.history_cap, MIN_HISTORY_CAP, MAX_HISTORY_CAP
                ),
            });
        }

        if self.rate_interval_ms < MIN_RATE_INTERVAL_MS {
            errors.push(ValidationError {
                field: "store.rate_interval_ms".to_string(),
                message: format!(
                    "rate interval {} is too short (minimum {} ms)",
                    self.rate_interval_ms, MIN_RATE_INTERVAL_MS
                ),
            });
        } else if self.rate_interval_ms > MAX_RATE_INTERVAL_MS {
            errors.push(ValidationError {
                field: "store.rate_interval_ms".to_string(),
                message: format!(
                    "rate interval {} is too long (maximum {} ms / 1 minute)",
                    self.rate_interval_ms, MAX_RATE_INTERVAL_MS
                ),
            });
        }

        errors
    }

    /// Store options for these settings.
    pub fn to_options(&self) -> StoreOptions {
        StoreOptions::new()
            .history_cap(self.history_cap)
            .rate_interval(Duration::from_millis(self.rate_interval_ms))
    }
}

/// Replay settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Speed multiplier (1.0 = real time).
    pub playback_rate: f64,
    /// Restart after the last packet.
    pub loop_playback: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            playback_rate: 1.0,
            loop_playback: false,
        }
    }
}

impl ReplayConfig {
    /// Validate replay settings.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if !self.playback_rate.is_finite() || self.playback_rate <= 0.0 {
            errors.push(ValidationError {
                field: "replay.playback_rate".to_string(),
                message: format!(
                    "playback rate {} must be a positive number",
                    self.playback_rate
                ),
            });
        } else if self.playback_rate > MAX_PLAYBACK_RATE {
            errors.push(ValidationError {
                field: "replay.playback_rate".to_string(),
                message: format!(
                    "playback rate {} is too high (maximum {})",
                    self.playback_rate, MAX_PLAYBACK_RATE
                ),
            });
        }

        errors
    }

    /// Scheduler options for these settings.
    pub fn to_options(&self) -> ReplayOptions {
        ReplayOptions::new()
            .playback_rate(self.playback_rate)
            .loop_playback(self.loop_playback)
    }
}

/// Recorder settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Capture limit.
    pub max_records: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            max_records: DEFAULT_MAX_RECORDS,
        }
    }
}

impl RecorderConfig {
    /// Validate recorder settings.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.max_records == 0 {
            errors.push(ValidationError {
                field: "recorder.max_records".to_string(),
                message: "max records must be at least 1".to_string(),
            });
        }
        errors
    }
}

/// Default query settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySection {
    /// Inclusive RSSI lower bound.
    pub min_rssi: i16,
    /// Case-insensitive substring filter.
    pub filter_text: String,
    /// Field the filter applies to.
    pub filter_field: FilterField,
    /// Sort key.
    pub sort_key: SortKey,
    /// Sort direction.
    pub sort_order: SortOrder,
}

impl Default for QuerySection {
    fn default() -> Self {
        Self::from(&QueryConfig::default())
    }
}

impl From<&QueryConfig> for QuerySection {
    fn from(query: &QueryConfig) -> Self {
        Self {
            min_rssi: query.min_rssi,
            filter_text: query.filter_text.clone(),
            filter_field: query.filter_field,
            sort_key: query.sort_key,
            sort_order: query.sort_order,
        }
    }
}

impl QuerySection {
    /// Query parameters for these settings.
    pub fn to_query(&self) -> QueryConfig {
        QueryConfig {
            min_rssi: self.min_rssi,
            filter_text: self.filter_text.clone(),
            filter_field: self.filter_field,
            sort_key: self.sort_key,
            sort_order: self.sort_order,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The field path (e.g., `replay.playback_rate`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("blewatch")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_errors(config: &Config) -> Vec<String> {
        match config.validate() {
            Ok(()) => Vec::new(),
            Err(ConfigError::Validation(errors)) => errors.into_iter().map(|e| e.field).collect(),
            Err(other) => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.store.history_cap, 120);
        assert_eq!(config.store.rate_interval_ms, 1000);
        assert_eq!(config.replay.playback_rate, 1.0);
        assert!(!config.replay.loop_playback);
        assert_eq!(config.recorder.max_records, 10_000);
        assert_eq!(config.query.min_rssi, DEFAULT_MIN_RSSI);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [replay]
            playback_rate = 2.5

            [query]
            sort_key = "lastSeen"
            sort_order = "asc"
            "#,
        )
        .unwrap();
        assert_eq!(config.replay.playback_rate, 2.5);
        assert!(!config.replay.loop_playback);
        assert_eq!(config.store.history_cap, 120);
        assert_eq!(config.query.sort_key, SortKey::LastSeen);
        assert_eq!(config.query.sort_order, SortOrder::Asc);
        assert_eq!(config.query.filter_field, FilterField::Name);
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut config = Config::default();
        config.store.history_cap = 0;
        config.store.rate_interval_ms = 10;
        config.replay.playback_rate = 0.0;
        config.recorder.max_records = 0;

        assert_eq!(
            field_errors(&config),
            vec![
                "store.history_cap",
                "store.rate_interval_ms",
                "replay.playback_rate",
                "recorder.max_records",
            ]
        );

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Configuration validation failed"));
        assert!(err.to_string().contains("  - store.history_cap"));
    }

    #[test]
    fn test_playback_rate_bounds() {
        let mut config = Config::default();
        config.replay.playback_rate = f64::NAN;
        assert_eq!(field_errors(&config), vec!["replay.playback_rate"]);

        config.replay.playback_rate = 250.0;
        assert_eq!(field_errors(&config), vec!["replay.playback_rate"]);

        config.replay.playback_rate = 100.0;
        assert!(field_errors(&config).is_empty());
    }

    #[test]
    fn test_rate_interval_too_long() {
        let mut config = Config::default();
        config.store.rate_interval_ms = 120_000;
        assert_eq!(field_errors(&config), vec!["store.rate_interval_ms"]);
    }

    #[test]
    fn test_conversions() {
        let mut config = Config::default();
        config.store.history_cap = 5;
        config.store.rate_interval_ms = 500;
        config.replay.playback_rate = 3.0;
        config.replay.loop_playback = true;
        config.query.filter_text = "tag".to_string();

        let store = config.store.to_options();
        assert_eq!(store.history_cap, 5);
        assert_eq!(store.rate_interval, Duration::from_millis(500));

        let replay = config.replay.to_options();
        assert_eq!(replay.playback_rate, 3.0);
        assert!(replay.loop_playback);

        let query = config.query.to_query();
        assert_eq!(query.filter_text, "tag");
        assert_eq!(QuerySection::from(&query), config.query);
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.replay.playback_rate = 4.0;
        config.query.sort_key = SortKey::Name;
        config.query.filter_field = FilterField::Id;

        config.save(&config_path).unwrap();
        let loaded = Config::load_validated(&config_path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load("/nonexistent/blewatch.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_load_invalid_toml() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("bad.toml");
        std::fs::write(&path, "[replay\nplayback_rate = ").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_load_validated_rejects_invalid() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[recorder]\nmax_records = 0\n").unwrap();
        assert!(matches!(
            Config::load_validated(&path),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("blewatch/config.toml"));
    }
}
