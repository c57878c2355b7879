//! Table handles.

use serde::{Deserialize, Serialize};

/// A resolved table, optionally aliased for use in a query.
///
/// The same physical table may be joined several times (e.g. the invoice and
/// shipment addresses); each occurrence gets its own alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    model: String,
    table: String,
    alias: String,
}

impl TableRef {
    /// A handle whose alias is the table name itself.
    pub fn new(model: impl Into<String>, table: impl Into<String>) -> Self {
        let table = table.into();
        Self {
            model: model.into(),
            alias: table.clone(),
            table,
        }
    }

    /// The same table under a different alias.
    pub fn aliased(&self, alias: impl Into<String>) -> Self {
        Self {
            model: self.model.clone(),
            table: self.table.clone(),
            alias: alias.into(),
        }
    }

    /// Logical model name (e.g. `sale.line`).
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Physical table name (e.g. `sale_line`).
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }
}

impl core::fmt::Display for TableRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.alias == self.table {
            write!(f, "{}", self.table)
        } else {
            write!(f, "{} AS {}", self.table, self.alias)
        }
    }
}
