//! Statements the snapshot manager sends to the engine.
//!
//! These render to the exact Postgres DDL/maintenance statements. Names are
//! validated identifiers (see [`crate::config`]) and are emitted unquoted.

use core::fmt;

use crate::error::WarehouseResult;
use crate::query::{ParamStyle, Select};

#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotStatement {
    DropView {
        view: String,
    },
    CreateView {
        view: String,
        select: Select,
    },
    CreateUniqueIndex {
        index: String,
        view: String,
        column: String,
    },
    Refresh {
        view: String,
        concurrently: bool,
    },
}

/// Statement discriminant, used for logging and fault matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    DropView,
    CreateView,
    CreateUniqueIndex,
    RefreshConcurrently,
    Refresh,
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatementKind::DropView => "drop_view",
            StatementKind::CreateView => "create_view",
            StatementKind::CreateUniqueIndex => "create_unique_index",
            StatementKind::RefreshConcurrently => "refresh_concurrently",
            StatementKind::Refresh => "refresh",
        };
        f.write_str(s)
    }
}

impl SnapshotStatement {
    pub fn kind(&self) -> StatementKind {
        match self {
            SnapshotStatement::DropView { .. } => StatementKind::DropView,
            SnapshotStatement::CreateView { .. } => StatementKind::CreateView,
            SnapshotStatement::CreateUniqueIndex { .. } => StatementKind::CreateUniqueIndex,
            SnapshotStatement::Refresh {
                concurrently: true, ..
            } => StatementKind::RefreshConcurrently,
            SnapshotStatement::Refresh {
                concurrently: false,
                ..
            } => StatementKind::Refresh,
        }
    }

    pub fn view(&self) -> &str {
        match self {
            SnapshotStatement::DropView { view }
            | SnapshotStatement::CreateView { view, .. }
            | SnapshotStatement::CreateUniqueIndex { view, .. }
            | SnapshotStatement::Refresh { view, .. } => view,
        }
    }

    /// Render to SQL. The view SELECT is rendered with inline literals.
    pub fn to_sql(&self) -> WarehouseResult<String> {
        Ok(match self {
            SnapshotStatement::DropView { view } => {
                format!("DROP MATERIALIZED VIEW IF EXISTS {view}")
            }
            SnapshotStatement::CreateView { view, select } => {
                let select = select.to_sql(ParamStyle::Inline)?;
                format!("CREATE MATERIALIZED VIEW {view} AS {} WITH NO DATA", select.sql)
            }
            SnapshotStatement::CreateUniqueIndex {
                index,
                view,
                column,
            } => format!("CREATE UNIQUE INDEX {index} ON {view} ({column})"),
            SnapshotStatement::Refresh {
                view,
                concurrently: true,
            } => format!("REFRESH MATERIALIZED VIEW CONCURRENTLY {view}"),
            SnapshotStatement::Refresh {
                view,
                concurrently: false,
            } => format!("REFRESH MATERIALIZED VIEW {view}"),
        })
    }
}
