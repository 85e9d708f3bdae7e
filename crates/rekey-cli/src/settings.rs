//! Settings file and command-line overrides
//!
//! ```toml
//! [migration]
//! unique_index_table = "unique_index"
//! max_concurrency = 1000
//!
//! [store]
//! page_size = 100
//! entity_table = "entities"
//!
//! [key_schema]
//! attributes = ["tenant", "email"]
//! prefix = "user#"
//! format = { kind = "joined", separator = "#" }
//!
//! [logging]
//! format = "pretty"
//! ```

use crate::logging::LogFormat;
use anyhow::{bail, Context};
use rekey_core::memory::{KeyFormat, KeySchema, MemoryStore};
use rekey_core::{MigrationConfig, TableName};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Everything a command needs besides its input file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Engine configuration
    pub migration: MigrationConfig,
    /// Memory backend layout
    pub store: StoreSettings,
    /// Current natural-key schema
    pub key_schema: Option<KeySchema>,
    /// Log output
    pub logging: LoggingSettings,
}

/// Memory backend layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Records per scan page
    pub page_size: usize,
    /// Table holding one record per identity
    pub entity_table: TableName,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            page_size: MemoryStore::DEFAULT_PAGE_SIZE,
            entity_table: TableName::from("entities"),
        }
    }
}

/// Log output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Line format
    pub format: LogFormat,
}

/// Key format selected on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFormatKind {
    /// Joined values; keeps a configured separator
    Joined,
    /// JSON array
    Json,
}

impl KeyFormatKind {
    /// Parse a command-line value
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "joined" => Some(Self::Joined),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Command-line values that take precedence over the settings file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    /// `--concurrency`
    pub max_concurrency: Option<usize>,
    /// `--unique-index-table`
    pub unique_index_table: Option<String>,
    /// `--page-size`
    pub page_size: Option<usize>,
    /// `--key-attributes`
    pub key_attributes: Option<Vec<String>>,
    /// `--key-prefix`
    pub key_prefix: Option<String>,
    /// `--key-format`
    pub key_format: Option<KeyFormatKind>,
    /// `--log-format`
    pub log_format: Option<LogFormat>,
}

impl Settings {
    /// Parse and validate TOML
    ///
    /// # Errors
    /// Fails on malformed TOML or invalid migration settings.
    pub fn from_toml_str(source: &str) -> anyhow::Result<Self> {
        let settings: Self = toml::from_str(source).context("parsing settings")?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load and validate a TOML file
    ///
    /// # Errors
    /// Fails when the file cannot be read or does not validate.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings file {}", path.display()))?;
        Self::from_toml_str(&source).with_context(|| format!("in {}", path.display()))
    }

    /// Settings from an optional file with `overrides` applied
    ///
    /// # Errors
    /// Fails when the file cannot be loaded or the result does not validate.
    pub fn resolve(path: Option<&Path>, overrides: &Overrides) -> anyhow::Result<Self> {
        let settings = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        let settings = settings.with_overrides(overrides);
        settings.validate()?;
        Ok(settings)
    }

    /// Apply command-line overrides
    #[must_use]
    pub fn with_overrides(mut self, overrides: &Overrides) -> Self {
        if let Some(max) = overrides.max_concurrency {
            self.migration = self.migration.with_max_concurrency(max);
        }
        if let Some(table) = &overrides.unique_index_table {
            self.migration = self.migration.with_unique_index_table(table.as_str());
        }
        if let Some(page_size) = overrides.page_size {
            self.store.page_size = page_size;
        }
        if let Some(format) = overrides.log_format {
            self.logging.format = format;
        }

        if let Some(attributes) = &overrides.key_attributes {
            match &mut self.key_schema {
                Some(schema) => schema.attributes.clone_from(attributes),
                None => self.key_schema = Some(KeySchema::new(attributes.iter().cloned())),
            }
        }
        if let Some(schema) = &mut self.key_schema {
            if let Some(prefix) = &overrides.key_prefix {
                schema.prefix = Some(prefix.clone());
            }
            match overrides.key_format {
                Some(KeyFormatKind::Json) => schema.format = KeyFormat::Json,
                Some(KeyFormatKind::Joined) if schema.format == KeyFormat::Json => {
                    schema.format = KeyFormat::default();
                }
                _ => {}
            }
        }
        self
    }

    /// Check value ranges
    ///
    /// # Errors
    /// Fails on invalid migration settings or a zero page size.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.migration.validate()?;
        if self.store.page_size == 0 {
            bail!("store.page_size must be at least 1");
        }
        Ok(())
    }

    /// The configured key schema
    ///
    /// # Errors
    /// Fails when no schema is configured or it names no attributes.
    pub fn key_schema(&self) -> anyhow::Result<KeySchema> {
        match &self.key_schema {
            Some(schema) if !schema.attributes.is_empty() => Ok(schema.clone()),
            Some(_) => bail!("key_schema.attributes must name at least one attribute"),
            None => bail!("no key schema configured; pass --key-attributes or set [key_schema]"),
        }
    }
}
