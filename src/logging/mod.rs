//! # Logging System
//!
//! Installs an `env_logger` backend configured from [`LogConfig`] and keeps
//! the active configuration available for runtime level changes.

pub mod config;
pub mod features;

use config::{parse_level, LogConfig};
use once_cell::sync::OnceCell;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::RwLock;

pub use config::ConfigError;
pub use features::{LogFeature, PerformanceTimer};

/// Global logging configuration instance
static LOGGING_CONFIG: OnceCell<Arc<RwLock<LogConfig>>> = OnceCell::new();

pub struct LoggingSystem;

impl LoggingSystem {
    /// Initialize the logging system with default configuration
    pub async fn init_default() -> Result<(), LoggingError> {
        Self::init_with_config(LogConfig::default()).await
    }

    /// Initialize the logging system from a TOML file
    pub async fn init_from_file(path: &str) -> Result<(), LoggingError> {
        let config = LogConfig::from_file(path)?;
        Self::init_with_config(config).await
    }

    /// Initialize the logging system with a custom configuration
    pub async fn init_with_config(config: LogConfig) -> Result<(), LoggingError> {
        config.validate()?;
        let default_level = parse_level(&config.general.default_level)
            .ok_or_else(|| LoggingError::Config(config.general.default_level.clone()))?;

        let mut builder = env_logger::Builder::new();
        builder.filter_level(default_level);
        let mut max_level = default_level;
        for (key, level) in &config.features {
            if let (Some(feature), Some(filter)) = (LogFeature::from_key(key), parse_level(level)) {
                builder.filter_module(feature.target(), filter);
                max_level = max_level.max(filter);
            }
        }
        let include_timestamp = config.console.include_timestamp;
        let include_module = config.console.include_module;
        builder.format(move |buf, record| {
            if include_timestamp {
                write!(buf, "{} ", chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"))?;
            }
            if include_module {
                write!(buf, "[{}] ", record.target())?;
            }
            writeln!(buf, "{} {}", record.level(), record.args())
        });

        LOGGING_CONFIG
            .set(Arc::new(RwLock::new(config)))
            .map_err(|_| LoggingError::AlreadyInitialized)?;

        // Another logger may already be installed by the host application
        builder.try_init().ok();
        log::set_max_level(max_level);
        Ok(())
    }

    /// Get the global logging configuration
    pub async fn get_config() -> Option<LogConfig> {
        match LOGGING_CONFIG.get() {
            Some(config_arc) => Some(config_arc.read().await.clone()),
            None => None,
        }
    }

    /// Update feature-specific log level
    ///
    /// The installed backend keeps its filters; only the global max level is
    /// raised when the new level is more verbose.
    pub async fn update_feature_level(feature: &str, level: &str) -> Result<(), LoggingError> {
        let feature = LogFeature::from_key(feature)
            .ok_or_else(|| LoggingError::Config(format!("Unknown feature: {}", feature)))?;
        let filter = parse_level(level)
            .ok_or_else(|| LoggingError::Config(format!("Invalid log level: {}", level)))?;
        let config_arc = LOGGING_CONFIG
            .get()
            .ok_or_else(|| LoggingError::Config("Logging system not initialized".to_string()))?;

        let mut config_guard = config_arc.write().await;
        config_guard
            .features
            .insert(feature.key().to_string(), level.to_string());
        if filter > log::max_level() {
            log::set_max_level(filter);
        }
        Ok(())
    }
}

/// Logging system errors
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Logging system already initialized")]
    AlreadyInitialized,
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Config error: {0}")]
    ConfigError(#[from] ConfigError),
}
