use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::constants::{DEFAULT_SORT_LOCK_TIMEOUT_MS, DEFAULT_VIEW_SAMPLE_SIZE};
use crate::error::{SyncError, SyncResult};
use crate::naming::NamingMode;
use crate::sort::SortGuardMode;
use crate::storage::Dialect;

/// Sort assignment settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortConfig {
    #[serde(default)]
    pub guard: SortGuardMode,
    /// How long an assignment waits for its scope lock
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

fn default_lock_timeout_ms() -> u64 {
    DEFAULT_SORT_LOCK_TIMEOUT_MS
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            guard: SortGuardMode::default(),
            lock_timeout_ms: DEFAULT_SORT_LOCK_TIMEOUT_MS,
        }
    }
}

/// Configuration for a [`CollectionEngine`](crate::CollectionEngine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Path where the sled database lives
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,
    /// Use an in-memory database removed on drop
    #[serde(default)]
    pub temporary: bool,
    #[serde(default)]
    pub dialect: Dialect,
    #[serde(default)]
    pub naming: NamingMode,
    /// Namespace assigned to collections created without one
    #[serde(default)]
    pub default_schema: Option<String>,
    #[serde(default)]
    pub sort: SortConfig,
    /// Reconcile every registered collection right after bootstrap
    #[serde(default = "default_sync_on_bootstrap")]
    pub sync_on_bootstrap: bool,
    /// Rows sampled when guessing view column types on weak dialects
    #[serde(default = "default_view_sample_size")]
    pub view_sample_size: usize,
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("data")
}

fn default_sync_on_bootstrap() -> bool {
    true
}

fn default_view_sample_size() -> usize {
    DEFAULT_VIEW_SAMPLE_SIZE
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage_path: default_storage_path(),
            temporary: false,
            dialect: Dialect::default(),
            naming: NamingMode::default(),
            default_schema: None,
            sort: SortConfig::default(),
            sync_on_bootstrap: default_sync_on_bootstrap(),
            view_sample_size: DEFAULT_VIEW_SAMPLE_SIZE,
        }
    }
}

impl EngineConfig {
    /// Create a new engine configuration with the specified storage path
    pub fn new(storage_path: PathBuf) -> Self {
        Self {
            storage_path,
            ..Default::default()
        }
    }

    /// In-memory configuration for tests and tooling.
    pub fn temporary(dialect: Dialect) -> Self {
        Self {
            temporary: true,
            dialect,
            ..Default::default()
        }
    }

    pub fn with_naming(mut self, naming: NamingMode) -> Self {
        self.naming = naming;
        self
    }

    pub fn with_default_schema(mut self, schema: &str) -> Self {
        self.default_schema = Some(schema.to_string());
        self
    }

    pub fn with_sort_guard(mut self, guard: SortGuardMode) -> Self {
        self.sort.guard = guard;
        self
    }

    pub fn with_lock_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.sort.lock_timeout_ms = timeout_ms;
        self
    }

    /// Apply `DB_DIALECT`, `DB_UNDERSCORED` and `DB_SCHEMA` overrides.
    pub fn apply_env_overrides(&mut self) -> SyncResult<()> {
        if let Ok(dialect) = std::env::var("DB_DIALECT") {
            self.dialect = dialect.parse()?;
        }
        if let Ok(underscored) = std::env::var("DB_UNDERSCORED") {
            let underscored = underscored.parse::<bool>().map_err(|e| {
                SyncError::Config(format!("DB_UNDERSCORED must be true or false: {}", e))
            })?;
            self.naming = NamingMode::from_underscored(underscored);
        }
        if let Ok(schema) = std::env::var("DB_SCHEMA") {
            self.default_schema = (!schema.is_empty()).then_some(schema);
        }
        Ok(())
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.sort.lock_timeout_ms == 0 {
            return Err(SyncError::Config(
                "sort.lock_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.view_sample_size == 0 {
            return Err(SyncError::Config(
                "view_sample_size must be greater than zero".to_string(),
            ));
        }
        if self.default_schema.is_some() && !self.dialect.supports_schemas() {
            log::warn!(
                "default_schema is ignored for dialect '{}' without schema support",
                self.dialect
            );
        }
        Ok(())
    }
}

/// Load an engine configuration from the given path or from the
/// `ENGINE_CONFIG` environment variable.
///
/// If the file does not exist, a default [`EngineConfig`] is returned.
/// Environment overrides apply in both cases.
pub fn load_engine_config(path: Option<&str>) -> SyncResult<EngineConfig> {
    use std::fs;

    let config_path = path
        .map(|p| p.to_string())
        .or_else(|| std::env::var("ENGINE_CONFIG").ok())
        .unwrap_or_else(|| "config/engine_config.json".to_string());

    let mut config = match fs::read_to_string(&config_path) {
        Ok(config_str) => serde_json::from_str::<EngineConfig>(&config_str).map_err(|e| {
            log::error!("Failed to parse engine configuration: {}", e);
            SyncError::Config(format!("{}: {}", config_path, e))
        })?,
        Err(_) => {
            log::info!(
                "No engine configuration at {}, using defaults",
                config_path
            );
            EngineConfig::default()
        }
    };
    config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "dialect": "mysql", "naming": "normalized" }"#).unwrap();
        assert_eq!(config.dialect, Dialect::MySql);
        assert_eq!(config.naming, NamingMode::Normalized);
        assert_eq!(config.sort.lock_timeout_ms, DEFAULT_SORT_LOCK_TIMEOUT_MS);
        assert!(config.sync_on_bootstrap);
        assert_eq!(config.storage_path, PathBuf::from("data"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "temporary": true, "sort": {{ "guard": "scope_lock", "lock_timeout_ms": 250 }} }}"#
        )
        .unwrap();
        let config = load_engine_config(file.path().to_str()).unwrap();
        assert!(config.temporary);
        assert_eq!(config.sort.guard, SortGuardMode::ScopeLock);
        assert_eq!(config.sort.lock_timeout_ms, 250);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let err = load_engine_config(file.path().to_str()).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = EngineConfig::temporary(Dialect::Sqlite).with_lock_timeout_ms(0);
        assert!(config.validate().is_err());
    }
}
