//! Configuration loading and representation.
//!
//! Everything comes from environment variables with defaults:
//!
//! | variable | default |
//! |----------|---------|
//! | `DATABASE_URL` | unset |
//! | `SALEDW_VIEW_NAME` | `dw_sale_line` |
//! | `SALEDW_INDEX_NAME` | `unique_id` |
//! | `SALEDW_TEST_MODE` | `false` |
//! | `SALEDW_MODULES` | empty (comma-separated) |

use saledw_core::registry::is_identifier;
use thiserror::Error;

pub const DEFAULT_VIEW_NAME: &str = "dw_sale_line";
pub const DEFAULT_INDEX_NAME: &str = "unique_id";
pub const ID_COLUMN: &str = "id";

/// Postgres truncates identifiers beyond this many bytes.
const MAX_IDENTIFIER_LEN: usize = 63;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: '{value}' is not a valid SQL identifier")]
    InvalidIdentifier { var: &'static str, value: String },

    #[error("{var}: '{value}' is not a boolean")]
    InvalidBool { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarehouseConfig {
    /// Postgres connection string; only the binary needs it.
    pub database_url: Option<String>,
    /// Name of the materialized view.
    pub view_name: String,
    /// Name of the unique index backing concurrent refresh.
    pub index_name: String,
    /// Output column the unique index is built on.
    pub id_column: String,
    /// Skip setup entirely (the host is running its test suite).
    pub test_mode: bool,
    /// Optional modules installed in this deployment (e.g. `sale_channel`).
    pub modules: Vec<String>,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            view_name: DEFAULT_VIEW_NAME.to_string(),
            index_name: DEFAULT_INDEX_NAME.to_string(),
            id_column: ID_COLUMN.to_string(),
            test_mode: false,
            modules: Vec::new(),
        }
    }
}

impl WarehouseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let test_mode = match lookup("SALEDW_TEST_MODE") {
            Some(raw) => parse_bool("SALEDW_TEST_MODE", &raw)?,
            None => defaults.test_mode,
        };

        let modules = lookup("SALEDW_MODULES")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let config = Self {
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            view_name: lookup("SALEDW_VIEW_NAME").unwrap_or(defaults.view_name),
            index_name: lookup("SALEDW_INDEX_NAME").unwrap_or(defaults.index_name),
            id_column: defaults.id_column,
            test_mode,
            modules,
        };
        config.validate()?;
        Ok(config)
    }

    /// Names end up unquoted in DDL, so they must be plain identifiers.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_identifier("SALEDW_VIEW_NAME", &self.view_name)?;
        check_identifier("SALEDW_INDEX_NAME", &self.index_name)?;
        check_identifier("id column", &self.id_column)?;
        Ok(())
    }

    pub fn has_module(&self, module: &str) -> bool {
        self.modules.iter().any(|m| m == module)
    }

    pub fn with_view_name(mut self, name: impl Into<String>) -> Self {
        self.view_name = name.into();
        self
    }

    pub fn with_test_mode(mut self, test_mode: bool) -> Self {
        self.test_mode = test_mode;
        self
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.modules.push(module.into());
        self
    }
}

fn check_identifier(var: &'static str, value: &str) -> Result<(), ConfigError> {
    if is_identifier(value) && value.len() <= MAX_IDENTIFIER_LEN {
        Ok(())
    } else {
        Err(ConfigError::InvalidIdentifier {
            var,
            value: value.to_string(),
        })
    }
}

fn parse_bool(var: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            var,
            value: raw.to_string(),
        }),
    }
}
