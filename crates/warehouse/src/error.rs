//! Warehouse error model.
//!
//! ## Error Mapping
//!
//! Driver errors are classified by SQLSTATE class:
//!
//! | SQLSTATE class | `DbErrorKind` | Typical cause |
//! |----------------|---------------|---------------|
//! | `0A` | `FeatureNotSupported` | `CONCURRENTLY` on an unpopulated view |
//! | `42` | `Programming` | syntax error, undefined table, duplicate object |
//! | `55` | `PrerequisiteState` | concurrent refresh without a unique index |
//! | `23` | `IntegrityViolation` | duplicate key in the unique index |
//! | other | `Other` | anything else |
//!
//! Only the first three can mark a concurrent refresh as unsupported; see
//! [`WarehouseError::is_concurrent_refresh_unsupported`].

use saledw_core::RegistryError;
use thiserror::Error;

pub type WarehouseResult<T> = Result<T, WarehouseError>;

/// Database error category, derived from the SQLSTATE class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbErrorKind {
    FeatureNotSupported,
    Programming,
    PrerequisiteState,
    IntegrityViolation,
    Other,
}

impl DbErrorKind {
    pub fn from_sqlstate(code: &str) -> Self {
        match code.get(..2) {
            Some("0A") => DbErrorKind::FeatureNotSupported,
            Some("42") => DbErrorKind::Programming,
            Some("55") => DbErrorKind::PrerequisiteState,
            Some("23") => DbErrorKind::IntegrityViolation,
            _ => DbErrorKind::Other,
        }
    }
}

#[derive(Debug, Error)]
pub enum WarehouseError {
    /// The engine rejected a statement.
    #[error("database error in {operation} ({code}): {message}")]
    Database {
        operation: String,
        code: String,
        kind: DbErrorKind,
        message: String,
    },

    /// The connection could not be used (pool closed, I/O, timeout).
    #[error("connection error in {operation}: {message}")]
    Connection { operation: String, message: String },

    /// A required model could not be resolved while building the view.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The view definition cannot be rendered or evaluated.
    #[error("invalid view definition: {0}")]
    InvalidDefinition(String),
}

impl WarehouseError {
    pub fn database(
        operation: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let code = code.into();
        Self::Database {
            operation: operation.into(),
            kind: DbErrorKind::from_sqlstate(&code),
            code,
            message: message.into(),
        }
    }

    pub fn connection(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> Option<DbErrorKind> {
        match self {
            Self::Database { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Whether this error means the engine cannot refresh concurrently.
    ///
    /// Recognised by SQLSTATE, then by the engine's own wording:
    ///
    /// | SQLSTATE | Message |
    /// |----------|---------|
    /// | `0A000` | mentions the `CONCURRENTLY` keyword (view never populated) |
    /// | `42601` | syntax error at the `CONCURRENTLY` token (grammar predates it) |
    /// | `55000` | `cannot refresh materialized view ... concurrently` (no unique index) |
    ///
    /// Quoted identifiers are ignored when matching, so a relation whose name
    /// contains the word never qualifies. [`crate::snapshot::SnapshotManager`]
    /// probes the server version first so the match only decides what the
    /// probe could not.
    pub fn is_concurrent_refresh_unsupported(&self) -> bool {
        let Self::Database { code, message, .. } = self else {
            return false;
        };
        let unquoted = strip_quoted(message);
        match code.as_str() {
            "0A000" => unquoted.contains("CONCURRENTLY"),
            "42601" => message.contains("at or near \"CONCURRENTLY\""),
            "55000" => {
                unquoted.starts_with("cannot refresh materialized view")
                    && unquoted.trim_end().ends_with("concurrently")
            }
            _ => false,
        }
    }
}

/// `message` with every double-quoted identifier removed.
fn strip_quoted(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    let mut quoted = false;
    for c in message.chars() {
        if c == '"' {
            quoted = !quoted;
        } else if !quoted {
            out.push(c);
        }
    }
    out
}

#[cfg(feature = "postgres")]
impl WarehouseError {
    /// Map a sqlx error raised during `operation`.
    pub fn from_sqlx(operation: &str, err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                let code = db_err
                    .code()
                    .map(|c| c.into_owned())
                    .unwrap_or_else(|| "XX000".to_string());
                WarehouseError::database(operation, code, db_err.message())
            }
            sqlx::Error::PoolClosed => {
                WarehouseError::connection(operation, "connection pool closed")
            }
            sqlx::Error::PoolTimedOut => {
                WarehouseError::connection(operation, "timed out acquiring a connection")
            }
            sqlx::Error::Io(e) => WarehouseError::connection(operation, e.to_string()),
            other => WarehouseError::connection(operation, other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_sqlstate_classes() {
        assert_eq!(DbErrorKind::from_sqlstate("0A000"), DbErrorKind::FeatureNotSupported);
        assert_eq!(DbErrorKind::from_sqlstate("42601"), DbErrorKind::Programming);
        assert_eq!(DbErrorKind::from_sqlstate("55000"), DbErrorKind::PrerequisiteState);
        assert_eq!(DbErrorKind::from_sqlstate("23505"), DbErrorKind::IntegrityViolation);
        assert_eq!(DbErrorKind::from_sqlstate("08006"), DbErrorKind::Other);
        assert_eq!(DbErrorKind::from_sqlstate(""), DbErrorKind::Other);
    }

    #[test]
    fn unpopulated_view_is_unsupported() {
        let err = WarehouseError::database(
            "refresh",
            "0A000",
            "CONCURRENTLY cannot be used when the materialized view is not populated",
        );
        assert!(err.is_concurrent_refresh_unsupported());
    }

    #[test]
    fn missing_unique_index_is_unsupported() {
        let err = WarehouseError::database(
            "refresh",
            "55000",
            "cannot refresh materialized view \"public.dw_sale_line\" concurrently",
        );
        assert!(err.is_concurrent_refresh_unsupported());
    }

    #[test]
    fn old_grammar_is_unsupported() {
        let err = WarehouseError::database(
            "refresh",
            "42601",
            "syntax error at or near \"CONCURRENTLY\"",
        );
        assert!(err.is_concurrent_refresh_unsupported());
    }

    #[test]
    fn other_errors_are_not_unsupported() {
        let wrong_kind = WarehouseError::database(
            "refresh",
            "23505",
            "could not create unique index \"unique_id\" while refreshing CONCURRENTLY",
        );
        assert!(!wrong_kind.is_concurrent_refresh_unsupported());

        let wrong_message = WarehouseError::database(
            "refresh",
            "42P01",
            "relation \"dw_sale_line\" does not exist",
        );
        assert!(!wrong_message.is_concurrent_refresh_unsupported());

        let connection = WarehouseError::connection("refresh", "CONCURRENTLY lost connection");
        assert!(!connection.is_concurrent_refresh_unsupported());
    }

    #[test]
    fn view_named_after_the_keyword_is_not_unsupported() {
        let missing = WarehouseError::database(
            "refresh",
            "42P01",
            "relation \"dw_concurrently_lines\" does not exist",
        );
        assert!(!missing.is_concurrent_refresh_unsupported());

        let upper = WarehouseError::database(
            "refresh",
            "0A000",
            "materialized view \"DW_CONCURRENTLY\" is not supported here",
        );
        assert!(!upper.is_concurrent_refresh_unsupported());

        let in_use = WarehouseError::database(
            "refresh",
            "55006",
            "cannot DROP MATERIALIZED VIEW \"dw_concurrently_lines\" because it is in use",
        );
        assert!(!in_use.is_concurrent_refresh_unsupported());

        let not_owner = WarehouseError::database(
            "refresh",
            "42501",
            "must be owner of materialized view dw_concurrently_lines",
        );
        assert!(!not_owner.is_concurrent_refresh_unsupported());
    }

    #[test]
    fn missing_unique_index_on_a_keyword_named_view_is_unsupported() {
        let err = WarehouseError::database(
            "refresh",
            "55000",
            "cannot refresh materialized view \"public.dw_concurrently_lines\" concurrently",
        );
        assert!(err.is_concurrent_refresh_unsupported());
    }
}
