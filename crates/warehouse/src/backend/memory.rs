//! In-memory warehouse engine.
//!
//! Intended for tests/dev. Source tables are plain rows; materialized views
//! are evaluated from their typed definition. The engine mimics the parts of
//! Postgres the snapshot manager depends on:
//!
//! - DDL and refreshes are transactional per unit of work;
//! - a failed statement aborts its unit of work until it is rolled back;
//! - `REFRESH ... CONCURRENTLY` fails on a view that was never populated
//!   (`0A000`) or that has no unique index (`55000`);
//! - unique indexes are enforced on refresh (`23505`).
//!
//! Faults can be injected per statement kind, and every begin, statement,
//! commit and rollback is recorded in a journal for assertions.
//!
//! Not meant for concurrent writers: the last unit of work to commit
//! replaces the catalog.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use saledw_core::Value;

use super::eval::evaluate;
pub use super::eval::Row;
use super::{UnitOfWork, WarehouseBackend};
use crate::error::{WarehouseError, WarehouseResult};
use crate::query::Select;
use crate::statement::{SnapshotStatement, StatementKind};

#[derive(Debug, Clone, PartialEq)]
pub enum JournalEntry {
    Begin(u64),
    Execute {
        uow: u64,
        kind: StatementKind,
        sql: String,
    },
    Failed {
        uow: u64,
        kind: StatementKind,
        code: Option<String>,
    },
    Commit(u64),
    Rollback(u64),
}

#[derive(Debug, Clone)]
struct StoredView {
    select: Select,
    /// `None` until the first refresh (created `WITH NO DATA`).
    rows: Option<Vec<Row>>,
}

#[derive(Debug, Clone)]
struct StoredIndex {
    view: String,
    column: String,
}

#[derive(Debug, Clone, Default)]
struct Catalog {
    views: HashMap<String, StoredView>,
    indexes: HashMap<String, StoredIndex>,
}

#[derive(Debug, Default)]
struct State {
    tables: HashMap<String, Vec<Row>>,
    catalog: Catalog,
    faults: Vec<(StatementKind, WarehouseError)>,
    journal: Vec<JournalEntry>,
    server_version: Option<u32>,
    next_uow: u64,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryWarehouse {
    state: Arc<Mutex<State>>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report a server version from [`WarehouseBackend::server_version`].
    pub fn with_server_version(self, version: u32) -> Self {
        self.lock().server_version = Some(version);
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create (or empty) a source table.
    pub fn create_table(&self, table: &str) {
        self.lock().tables.insert(table.to_string(), Vec::new());
    }

    pub fn insert(&self, table: &str, row: Row) {
        self.lock()
            .tables
            .entry(table.to_string())
            .or_default()
            .push(row);
    }

    /// Set `column` on the row whose `id` equals `id`. Returns whether a row matched.
    pub fn update(&self, table: &str, id: i64, column: &str, value: impl Into<Value>) -> bool {
        let mut state = self.lock();
        let Some(rows) = state.tables.get_mut(table) else {
            return false;
        };
        match rows.iter_mut().find(|r| r.get("id") == Some(&Value::Int(id))) {
            Some(row) => {
                row.insert(column.to_string(), value.into());
                true
            }
            None => false,
        }
    }

    /// Delete the row whose `id` equals `id`. Returns whether a row matched.
    pub fn delete(&self, table: &str, id: i64) -> bool {
        let mut state = self.lock();
        let Some(rows) = state.tables.get_mut(table) else {
            return false;
        };
        let before = rows.len();
        rows.retain(|r| r.get("id") != Some(&Value::Int(id)));
        rows.len() != before
    }

    /// Make the next statement of `kind` fail with `error`.
    pub fn inject_fault(&self, kind: StatementKind, error: WarehouseError) {
        self.lock().faults.push((kind, error));
    }

    pub fn journal(&self) -> Vec<JournalEntry> {
        self.lock().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.lock().journal.clear();
    }

    /// Committed statements of the given kind.
    pub fn committed_statements(&self, kind: StatementKind) -> usize {
        let journal = self.journal();
        let committed: HashSet<u64> = journal
            .iter()
            .filter_map(|e| match e {
                JournalEntry::Commit(uow) => Some(*uow),
                _ => None,
            })
            .collect();
        let failed: HashSet<(u64, StatementKind)> = journal
            .iter()
            .filter_map(|e| match e {
                JournalEntry::Failed { uow, kind, .. } => Some((*uow, *kind)),
                _ => None,
            })
            .collect();
        journal
            .iter()
            .filter(|e| match e {
                JournalEntry::Execute { uow, kind: k, .. } => {
                    *k == kind && committed.contains(uow) && !failed.contains(&(*uow, *k))
                }
                _ => false,
            })
            .count()
    }

    pub fn view_exists(&self, view: &str) -> bool {
        self.lock().catalog.views.contains_key(view)
    }

    pub fn view_count(&self) -> usize {
        self.lock().catalog.views.len()
    }

    pub fn is_populated(&self, view: &str) -> bool {
        self.lock()
            .catalog
            .views
            .get(view)
            .is_some_and(|v| v.rows.is_some())
    }

    /// Unique index column of `view`, if one exists.
    pub fn unique_index_column(&self, view: &str) -> Option<String> {
        self.lock()
            .catalog
            .indexes
            .values()
            .find(|i| i.view == view)
            .map(|i| i.column.clone())
    }

    /// Definition the view was created from.
    pub fn view_definition(&self, view: &str) -> Option<Select> {
        self.lock().catalog.views.get(view).map(|v| v.select.clone())
    }

    /// Committed rows of a populated view.
    pub fn snapshot(&self, view: &str) -> Option<Vec<Row>> {
        self.lock()
            .catalog
            .views
            .get(view)
            .and_then(|v| v.rows.clone())
    }
}

#[async_trait]
impl WarehouseBackend for MemoryWarehouse {
    type UnitOfWork = MemoryUnitOfWork;

    async fn begin(&self) -> WarehouseResult<MemoryUnitOfWork> {
        let mut state = self.lock();
        state.next_uow += 1;
        let id = state.next_uow;
        state.journal.push(JournalEntry::Begin(id));
        Ok(MemoryUnitOfWork {
            id,
            catalog: state.catalog.clone(),
            state: Arc::clone(&self.state),
            aborted: false,
        })
    }

    async fn server_version(&self) -> WarehouseResult<Option<u32>> {
        Ok(self.lock().server_version)
    }
}

/// A unit of work against [`MemoryWarehouse`]; works on a private catalog copy.
#[derive(Debug)]
pub struct MemoryUnitOfWork {
    id: u64,
    catalog: Catalog,
    state: Arc<Mutex<State>>,
    aborted: bool,
}

impl MemoryUnitOfWork {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply(&mut self, statement: &SnapshotStatement, state: &State) -> WarehouseResult<()> {
        match statement {
            SnapshotStatement::DropView { view } => {
                self.catalog.views.remove(view);
                self.catalog.indexes.retain(|_, index| &index.view != view);
                Ok(())
            }
            SnapshotStatement::CreateView { view, select } => {
                if self.catalog.views.contains_key(view) {
                    return Err(already_exists(view));
                }
                select.validate()?;
                for table in select.join_graph().tables() {
                    if !state.tables.contains_key(table.table()) {
                        return Err(undefined_relation(table.table()));
                    }
                }
                self.catalog.views.insert(
                    view.clone(),
                    StoredView {
                        select: select.clone(),
                        rows: None,
                    },
                );
                Ok(())
            }
            SnapshotStatement::CreateUniqueIndex {
                index,
                view,
                column,
            } => {
                if self.catalog.indexes.contains_key(index) {
                    return Err(already_exists(index));
                }
                let stored = self
                    .catalog
                    .views
                    .get(view)
                    .ok_or_else(|| undefined_relation(view))?;
                if !stored.select.column_aliases().any(|alias| alias == column) {
                    return Err(WarehouseError::database(
                        "execute",
                        "42703",
                        format!("column \"{column}\" does not exist"),
                    ));
                }
                if let Some(rows) = &stored.rows {
                    check_unique(index, column, rows)?;
                }
                self.catalog.indexes.insert(
                    index.clone(),
                    StoredIndex {
                        view: view.clone(),
                        column: column.clone(),
                    },
                );
                Ok(())
            }
            SnapshotStatement::Refresh { view, concurrently } => {
                let stored = self
                    .catalog
                    .views
                    .get(view)
                    .ok_or_else(|| undefined_relation(view))?;
                let unique = self
                    .catalog
                    .indexes
                    .iter()
                    .find(|(_, index)| &index.view == view)
                    .map(|(name, index)| (name.clone(), index.column.clone()));

                if *concurrently {
                    if stored.rows.is_none() {
                        return Err(WarehouseError::database(
                            "execute",
                            "0A000",
                            "CONCURRENTLY cannot be used when the materialized view \
                             is not populated",
                        ));
                    }
                    if unique.is_none() {
                        return Err(WarehouseError::database(
                            "execute",
                            "55000",
                            format!(
                                "cannot refresh materialized view \"public.{view}\" concurrently"
                            ),
                        ));
                    }
                }

                let rows = evaluate(&stored.select, &state.tables)?;
                if let Some((index, column)) = &unique {
                    check_unique(index, column, &rows)?;
                }
                if let Some(stored) = self.catalog.views.get_mut(view) {
                    stored.rows = Some(rows);
                }
                Ok(())
            }
        }
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn execute(&mut self, statement: &SnapshotStatement) -> WarehouseResult<()> {
        let kind = statement.kind();
        let sql = statement.to_sql()?;
        let shared = Arc::clone(&self.state);
        let mut state = shared.lock().unwrap_or_else(PoisonError::into_inner);
        state.journal.push(JournalEntry::Execute {
            uow: self.id,
            kind,
            sql,
        });

        let result = if self.aborted {
            Err(WarehouseError::database(
                "execute",
                "25P02",
                "current transaction is aborted, commands ignored until end of transaction block",
            ))
        } else if let Some(pos) = state.faults.iter().position(|(k, _)| *k == kind) {
            Err(state.faults.remove(pos).1)
        } else {
            self.apply(statement, &state)
        };

        if let Err(err) = &result {
            self.aborted = true;
            let code = match err {
                WarehouseError::Database { code, .. } => Some(code.clone()),
                _ => None,
            };
            state.journal.push(JournalEntry::Failed {
                uow: self.id,
                kind,
                code,
            });
        }
        result
    }

    async fn commit(self) -> WarehouseResult<()> {
        if self.aborted {
            self.lock().journal.push(JournalEntry::Rollback(self.id));
            return Err(WarehouseError::database(
                "commit",
                "25P02",
                "current transaction is aborted, commit rolled back",
            ));
        }
        let mut state = self.lock();
        state.catalog = self.catalog.clone();
        state.journal.push(JournalEntry::Commit(self.id));
        Ok(())
    }

    async fn rollback(self) -> WarehouseResult<()> {
        self.lock().journal.push(JournalEntry::Rollback(self.id));
        Ok(())
    }
}

fn check_unique(index: &str, column: &str, rows: &[Row]) -> WarehouseResult<()> {
    let mut seen: Vec<&Value> = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(value) = row.get(column) else {
            continue;
        };
        // NULLs never collide in a unique index.
        if value.is_null() {
            continue;
        }
        if seen.iter().any(|v| v.sql_eq(value) == Some(true)) {
            return Err(WarehouseError::database(
                "execute",
                "23505",
                format!(
                    "could not create unique index \"{index}\": \
                     key ({column})=({value:?}) is duplicated"
                ),
            ));
        }
        seen.push(value);
    }
    Ok(())
}

fn already_exists(name: &str) -> WarehouseError {
    WarehouseError::database("execute", "42P07", format!("relation \"{name}\" already exists"))
}

fn undefined_relation(name: &str) -> WarehouseError {
    WarehouseError::database("execute", "42P01", format!("relation \"{name}\" does not exist"))
}
