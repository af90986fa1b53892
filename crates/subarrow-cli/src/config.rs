//! Configuration for the subarrow CLI
//!
//! Loaded from `subarrow.yaml`. Environment variables override the file:
//! `SUBARROW_STRICTNESS`, `RUST_LOG`, `LOG_FORMAT`, `LOG_OUTPUT`, `LOG_DIR`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use subarrow_substrait::ConversionStrictness;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value '{value}' for {key}")]
    InvalidValue { key: &'static str, value: String },
}

/// Plan translation settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    pub strictness: ConversionStrictness,
}

/// How result batches are printed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Csv,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub format: OutputFormat,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or module-specific
    pub level: String,

    /// Output format: pretty, json, compact
    pub format: String,

    /// Output destination: stdout, file, both
    pub output: String,

    /// Directory for log files
    pub directory: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: "compact".to_string(),
            output: "stdout".to_string(),
            directory: "./logs".to_string(),
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub conversion: ConversionConfig,

    /// Named tables: dotted table name to an Arrow IPC or Parquet file
    pub tables: BTreeMap<String, PathBuf>,

    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from YAML file with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&contents)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Like [`Config::load`], falling back to defaults when the file is absent
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Apply overrides from `lookup`, keyed by environment variable name
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(strictness) = lookup("SUBARROW_STRICTNESS") {
            self.conversion.strictness = serde_yaml::from_str(&strictness).map_err(|_| {
                ConfigError::InvalidValue {
                    key: "SUBARROW_STRICTNESS",
                    value: strictness.clone(),
                }
            })?;
        }
        if let Some(level) = lookup("RUST_LOG") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Some(output) = lookup("LOG_OUTPUT") {
            self.logging.output = output;
        }
        if let Some(dir) = lookup("LOG_DIR") {
            self.logging.directory = dir;
        }
        Ok(())
    }

    /// Split a configured table name into the names of a named-table read
    pub fn table_names(&self) -> impl Iterator<Item = (Vec<String>, &Path)> {
        self.tables.iter().map(|(name, path)| {
            (
                name.split('.').map(str::to_string).collect(),
                path.as_path(),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.conversion.strictness, ConversionStrictness::BestEffort);
        assert_eq!(config.output.format, OutputFormat::Table);
        assert!(config.tables.is_empty());
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.logging.output, "stdout");
    }

    #[test]
    fn test_parse_yaml() {
        let config = Config::from_yaml(
            r#"
conversion:
  strictness: exact_round_trip
tables:
  sales: ./data/sales.parquet
  db.orders: ./data/orders.arrow
output:
  format: csv
"#,
        )
        .unwrap();
        assert_eq!(
            config.conversion.strictness,
            ConversionStrictness::ExactRoundTrip
        );
        assert_eq!(config.output.format, OutputFormat::Csv);
        // Unset sections keep their defaults
        assert_eq!(config.logging.format, "compact");

        let names: Vec<Vec<String>> = config.table_names().map(|(names, _)| names).collect();
        assert_eq!(
            names,
            vec![
                vec!["db".to_string(), "orders".to_string()],
                vec!["sales".to_string()],
            ]
        );
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("SUBARROW_STRICTNESS", "exact_round_trip"),
            ("RUST_LOG", "subarrow_substrait=trace"),
            ("LOG_OUTPUT", "both"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(
            config.conversion.strictness,
            ConversionStrictness::ExactRoundTrip
        );
        assert_eq!(config.logging.level, "subarrow_substrait=trace");
        assert_eq!(config.logging.output, "both");
        assert_eq!(config.logging.directory, "./logs");

        let err = Config::default()
            .apply_overrides(|key| (key == "SUBARROW_STRICTNESS").then(|| "loose".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subarrow.yaml");
        std::fs::write(&path, "output:\n  format: json\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.output.format, OutputFormat::Json);

        let missing = Config::load_or_default(dir.path().join("absent.yaml")).unwrap();
        assert_eq!(missing.output.format, OutputFormat::Table);
        assert!(Config::load(dir.path().join("absent.yaml")).is_err());
    }
}
