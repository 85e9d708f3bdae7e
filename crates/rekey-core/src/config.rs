//! Migration configuration

use crate::error::ConfigError;
use crate::limiter::ConcurrencyLimiter;
use crate::types::TableName;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Live unique-index table: default scan source and the destination
    pub unique_index_table: TableName,
    /// Ceiling on in-flight store operations
    pub max_concurrency: usize,
}

impl MigrationConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With unique-index table
    #[inline]
    #[must_use]
    pub fn with_unique_index_table(mut self, table: impl Into<TableName>) -> Self {
        self.unique_index_table = table.into();
        self
    }

    /// With max concurrency
    #[inline]
    #[must_use]
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    /// Check value ranges
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` for a zero concurrency ceiling or an
    /// empty table name.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid {
                field: "max_concurrency",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.unique_index_table.as_str().trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "unique_index_table",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Parse and validate TOML
    ///
    /// # Errors
    /// Returns `ConfigError::Parse` for malformed TOML and
    /// `ConfigError::Invalid` for out-of-range values.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    ///
    /// # Errors
    /// Returns `ConfigError::Io` when the file cannot be read, otherwise as
    /// [`MigrationConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            unique_index_table: TableName::from("unique_index"),
            max_concurrency: ConcurrencyLimiter::DEFAULT_MAX_IN_FLIGHT,
        }
    }
}
