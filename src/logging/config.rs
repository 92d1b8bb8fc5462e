//! Configuration for the logging system
//!
//! Loaded from a TOML file with environment variable overrides.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use super::features::LogFeature;

const VALID_LEVELS: [&str; 5] = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];

/// Main logging configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub console: ConsoleConfig,
    /// Feature-specific log levels, keyed by [`LogFeature::key`]
    #[serde(default = "LogConfig::default_features")]
    pub features: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default log level for all modules
    pub default_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    pub include_timestamp: bool,
    pub include_module: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            console: ConsoleConfig::default(),
            features: Self::default_features(),
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            default_level: "INFO".to_string(),
        }
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            include_timestamp: true,
            include_module: true,
        }
    }
}

impl LogConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::Io)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: LogConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("COLLECTION_SYNC_LOG_LEVEL") {
            self.general.default_level = level.to_uppercase();
        }
        for (key, value) in std::env::vars() {
            if let Some(feature) = key.strip_prefix("COLLECTION_SYNC_LOG_FEATURE_") {
                self.features
                    .insert(feature.to_lowercase(), value.to_uppercase());
            }
        }
    }

    fn default_features() -> HashMap<String, String> {
        let mut features = HashMap::new();
        for feature in LogFeature::ALL {
            let level = match feature {
                LogFeature::Storage => "WARN",
                _ => "INFO",
            };
            features.insert(feature.key().to_string(), level.to_string());
        }
        features
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !VALID_LEVELS.contains(&self.general.default_level.as_str()) {
            return Err(ConfigError::InvalidLevel(
                self.general.default_level.clone(),
            ));
        }
        for (feature, level) in &self.features {
            if LogFeature::from_key(feature).is_none() {
                return Err(ConfigError::UnknownFeature(feature.clone()));
            }
            if !VALID_LEVELS.contains(&level.as_str()) {
                return Err(ConfigError::InvalidFeatureLevel(
                    feature.clone(),
                    level.clone(),
                ));
            }
        }
        Ok(())
    }
}

/// Parses an upper-case level name.
pub fn parse_level(level: &str) -> Option<log::LevelFilter> {
    match level {
        "TRACE" => Some(log::LevelFilter::Trace),
        "DEBUG" => Some(log::LevelFilter::Debug),
        "INFO" => Some(log::LevelFilter::Info),
        "WARN" => Some(log::LevelFilter::Warn),
        "ERROR" => Some(log::LevelFilter::Error),
        _ => None,
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse configuration: {0}")]
    Parse(String),
    #[error("Invalid log level: {0}")]
    InvalidLevel(String),
    #[error("Unknown logging feature: {0}")]
    UnknownFeature(String),
    #[error("Invalid log level for feature '{0}': {1}")]
    InvalidFeatureLevel(String, String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_partial_toml() {
        let config = LogConfig::from_toml_str(
            r#"
            [general]
            default_level = "DEBUG"

            [features]
            sort = "TRACE"
            "#,
        )
        .unwrap();
        assert_eq!(config.general.default_level, "DEBUG");
        assert_eq!(config.features.get("sort").map(String::as_str), Some("TRACE"));
        assert!(config.console.include_timestamp);
    }

    #[test]
    fn test_rejects_unknown_levels() {
        let err = LogConfig::from_toml_str(
            r#"
            [features]
            view = "LOUD"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFeatureLevel(_, _)));
    }

    #[test]
    fn test_default_features_cover_every_target() {
        let config = LogConfig::default();
        for feature in LogFeature::ALL {
            assert!(config.features.contains_key(feature.key()));
        }
        assert_eq!(parse_level("WARN"), Some(log::LevelFilter::Warn));
        assert_eq!(parse_level("warn"), None);
    }
}
