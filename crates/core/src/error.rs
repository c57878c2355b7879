//! Registry error model.

use thiserror::Error;

/// Result type used by entity resolution.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Failure to resolve a logical model name to a table.
///
/// `NotRegistered` is the one condition optional lookups branch on; every
/// other variant is a real failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The model is not part of the current deployment (module not installed).
    #[error("model not registered: {0}")]
    NotRegistered(String),

    /// The model name is malformed (e.g. empty segment).
    #[error("invalid model name: {0}")]
    InvalidModelName(String),

    /// A model was registered twice with different tables.
    #[error("conflicting registration for {model}: {existing} vs {requested}")]
    Conflict {
        model: String,
        existing: String,
        requested: String,
    },
}

impl RegistryError {
    pub fn not_registered(model: impl Into<String>) -> Self {
        Self::NotRegistered(model.into())
    }

    pub fn invalid_model_name(model: impl Into<String>) -> Self {
        Self::InvalidModelName(model.into())
    }

    pub fn is_not_registered(&self) -> bool {
        matches!(self, Self::NotRegistered(_))
    }
}
