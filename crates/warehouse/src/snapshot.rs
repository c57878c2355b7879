//! Snapshot refresh manager.
//!
//! Owns the lifecycle of the materialized view: [`SnapshotManager::setup`]
//! (re)creates it empty with its unique index, [`SnapshotManager::refresh`]
//! repopulates it.
//!
//! ## Refresh
//!
//! ```text
//! Start -> AttemptConcurrentRefresh -> Success -> Committed
//!                                   -> Unsupported -> Rollback -> AttemptBlockingRefresh
//!                                                                 -> Committed
//!                                   -> OtherError -> Rollback -> Propagated
//! ```
//!
//! Each attempt runs in its own unit of work. A concurrent attempt is skipped
//! outright when the server reports a version older than 9.4. Otherwise an
//! error counts as "unsupported" per
//! [`WarehouseError::is_concurrent_refresh_unsupported`].
//!
//! A failed refresh never commits, so the previous contents stay visible.

use chrono::{DateTime, Utc};
use saledw_core::RefreshId;
use serde::Serialize;
use tracing::{Span, debug, field, info, instrument, warn};

use crate::backend::{UnitOfWork, WarehouseBackend};
use crate::config::WarehouseConfig;
use crate::definition::WarehouseQuery;
use crate::error::WarehouseResult;
use crate::statement::SnapshotStatement;

/// Log target for refresh fallbacks and skips.
pub const LOG_TARGET: &str = "sale_line_data_warehouse";

/// First `server_version_num` with `REFRESH MATERIALIZED VIEW CONCURRENTLY`.
pub const MIN_CONCURRENT_REFRESH_VERSION: u32 = 90400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshMode {
    Concurrent,
    Blocking,
}

/// Why a refresh ran blocking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// The server version predates concurrent refresh.
    ServerVersion,
    /// The concurrent attempt failed with an unsupported-mode error.
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub refresh_id: RefreshId,
    pub view: String,
    pub mode: RefreshMode,
    pub fallback: Option<FallbackReason>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RefreshOutcome {
    Refreshed(RefreshReport),
    /// No database driver is available.
    Skipped { view: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SetupOutcome {
    Created { view: String, index: String },
    SkippedTestMode { view: String },
    SkippedNoBackend { view: String },
}

/// Creates and refreshes the snapshot on a backend.
///
/// The backend is optional: without one (no database driver), setup and
/// refresh are logged no-ops.
#[derive(Debug, Clone)]
pub struct SnapshotManager<B> {
    backend: Option<B>,
    config: WarehouseConfig,
}

impl<B: WarehouseBackend> SnapshotManager<B> {
    pub fn new(backend: B, config: WarehouseConfig) -> Self {
        Self {
            backend: Some(backend),
            config,
        }
    }

    pub fn without_backend(config: WarehouseConfig) -> Self {
        Self {
            backend: None,
            config,
        }
    }

    pub fn config(&self) -> &WarehouseConfig {
        &self.config
    }

    pub fn backend(&self) -> Option<&B> {
        self.backend.as_ref()
    }

    /// Statements setup runs, in order.
    pub fn setup_statements(&self, query: &WarehouseQuery) -> Vec<SnapshotStatement> {
        let view = self.config.view_name.clone();
        vec![
            SnapshotStatement::DropView { view: view.clone() },
            SnapshotStatement::CreateView {
                view: view.clone(),
                select: query.select(),
            },
            SnapshotStatement::CreateUniqueIndex {
                index: self.config.index_name.clone(),
                view,
                column: self.config.id_column.clone(),
            },
        ]
    }

    /// Drop and recreate the empty snapshot and its unique index.
    ///
    /// Idempotent. Skipped entirely in test mode.
    #[instrument(skip(self, query), fields(view = %self.config.view_name), err)]
    pub async fn setup(&self, query: &WarehouseQuery) -> WarehouseResult<SetupOutcome> {
        let view = self.config.view_name.clone();
        if self.config.test_mode {
            debug!("test mode, setup skipped");
            return Ok(SetupOutcome::SkippedTestMode { view });
        }
        let Some(backend) = &self.backend else {
            info!(target: LOG_TARGET, view = %view, "no database driver available, setup skipped");
            return Ok(SetupOutcome::SkippedNoBackend { view });
        };

        let statements = self.setup_statements(query);
        let mut uow = backend.begin().await?;
        for statement in &statements {
            if let Err(err) = uow.execute(statement).await {
                rollback_quietly(uow).await;
                return Err(err);
            }
        }
        uow.commit().await?;

        info!(view = %view, index = %self.config.index_name, "snapshot created");
        Ok(SetupOutcome::Created {
            view,
            index: self.config.index_name.clone(),
        })
    }

    /// Repopulate the snapshot, concurrently when the engine allows it.
    #[instrument(
        skip(self),
        fields(view = %self.config.view_name, refresh_id = field::Empty),
        err
    )]
    pub async fn refresh(&self) -> WarehouseResult<RefreshOutcome> {
        let view = self.config.view_name.clone();
        let Some(backend) = &self.backend else {
            info!(
                target: LOG_TARGET,
                view = %view,
                "no database driver available, refresh skipped"
            );
            return Ok(RefreshOutcome::Skipped { view });
        };

        let refresh_id = RefreshId::new();
        Span::current().record("refresh_id", field::display(refresh_id));
        let started_at = Utc::now();

        let concurrent = SnapshotStatement::Refresh {
            view: view.clone(),
            concurrently: true,
        };
        let blocking = SnapshotStatement::Refresh {
            view: view.clone(),
            concurrently: false,
        };

        let (mode, fallback) = match probe_version(backend).await {
            Some(version) if version < MIN_CONCURRENT_REFRESH_VERSION => {
                info!(
                    target: LOG_TARGET,
                    view = %view,
                    server_version = version,
                    "server predates concurrent refresh, refreshing blocking"
                );
                run_in_own_unit(backend, &blocking).await?;
                (RefreshMode::Blocking, Some(FallbackReason::ServerVersion))
            }
            _ => {
                let mut uow = backend.begin().await?;
                match uow.execute(&concurrent).await {
                    Ok(()) => {
                        uow.commit().await?;
                        (RefreshMode::Concurrent, None)
                    }
                    Err(err) if err.is_concurrent_refresh_unsupported() => {
                        info!(
                            target: LOG_TARGET,
                            view = %view,
                            error = %err,
                            "concurrent refresh not possible, falling back to blocking refresh"
                        );
                        uow.rollback().await?;
                        run_in_own_unit(backend, &blocking).await?;
                        (RefreshMode::Blocking, Some(FallbackReason::Unsupported))
                    }
                    Err(err) => {
                        rollback_quietly(uow).await;
                        return Err(err);
                    }
                }
            }
        };

        let report = RefreshReport {
            refresh_id,
            view,
            mode,
            fallback,
            started_at,
            finished_at: Utc::now(),
        };
        info!(mode = ?report.mode, "snapshot refreshed");
        Ok(RefreshOutcome::Refreshed(report))
    }
}

/// Unknown when the engine does not report a version or the probe fails.
async fn probe_version<B: WarehouseBackend>(backend: &B) -> Option<u32> {
    match backend.server_version().await {
        Ok(version) => version,
        Err(err) => {
            debug!(error = %err, "server version probe failed");
            None
        }
    }
}

async fn run_in_own_unit<B: WarehouseBackend>(
    backend: &B,
    statement: &SnapshotStatement,
) -> WarehouseResult<()> {
    let mut uow = backend.begin().await?;
    if let Err(err) = uow.execute(statement).await {
        rollback_quietly(uow).await;
        return Err(err);
    }
    uow.commit().await
}

/// Roll back after a failed statement; a rollback failure is only logged.
async fn rollback_quietly<U: UnitOfWork>(uow: U) {
    if let Err(err) = uow.rollback().await {
        warn!(error = %err, "rollback failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{JournalEntry, MemoryWarehouse};
    use crate::definition::model;
    use crate::error::WarehouseError;
    use crate::statement::StatementKind;
    use proptest::prelude::*;
    use saledw_core::{EntityRegistry, StaticRegistry, Value};

    fn registry() -> StaticRegistry {
        let mut registry = StaticRegistry::new();
        for name in [
            model::SALE_LINE,
            model::SALE,
            model::PRODUCT,
            model::PRODUCT_TEMPLATE,
            model::PRODUCT_CATEGORY,
            model::PARTY,
            model::ADDRESS,
            model::COUNTRY,
            model::SUBDIVISION,
            model::CURRENCY,
        ] {
            registry.register(name).unwrap();
        }
        registry
    }

    fn database(registry: &StaticRegistry) -> MemoryWarehouse {
        let db = MemoryWarehouse::new();
        for name in registry.models() {
            db.create_table(registry.table(name).unwrap().table());
        }
        db
    }

    fn seed(db: &MemoryWarehouse) {
        db.insert(
            "sale_sale",
            [("id", Value::Int(1)), ("state", Value::from("done"))]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        );
        db.insert(
            "sale_line",
            [
                ("id", Value::Int(10)),
                ("sale", Value::Int(1)),
                ("type", Value::from("line")),
                ("quantity", Value::Int(2)),
                ("unit_price", Value::Int(3)),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
        );
    }

    async fn installed() -> (MemoryWarehouse, SnapshotManager<MemoryWarehouse>) {
        let registry = registry();
        let db = database(&registry);
        seed(&db);
        let manager = SnapshotManager::new(db.clone(), WarehouseConfig::default());
        let query = WarehouseQuery::build(&registry).unwrap();
        manager.setup(&query).await.unwrap();
        db.clear_journal();
        (db, manager)
    }

    fn refreshed(outcome: RefreshOutcome) -> RefreshReport {
        match outcome {
            RefreshOutcome::Refreshed(report) => report,
            other => panic!("expected a refresh, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn setup_creates_an_empty_indexed_view() {
        let (db, _) = installed().await;
        assert!(db.view_exists("dw_sale_line"));
        assert!(!db.is_populated("dw_sale_line"));
        assert_eq!(db.unique_index_column("dw_sale_line").as_deref(), Some("id"));
    }

    #[tokio::test]
    async fn setup_is_idempotent() {
        let (db, manager) = installed().await;
        let query = WarehouseQuery::build(&registry()).unwrap();
        let outcome = manager.setup(&query).await.unwrap();
        assert_eq!(
            outcome,
            SetupOutcome::Created {
                view: "dw_sale_line".into(),
                index: "unique_id".into()
            }
        );
        assert_eq!(db.view_count(), 1);
        assert_eq!(db.unique_index_column("dw_sale_line").as_deref(), Some("id"));
        assert_eq!(db.view_definition("dw_sale_line"), Some(query.select()));
    }

    #[tokio::test]
    async fn setup_is_skipped_in_test_mode() {
        let registry = registry();
        let db = database(&registry);
        let config = WarehouseConfig::default().with_test_mode(true);
        let manager = SnapshotManager::new(db.clone(), config);
        let outcome = manager.setup(&WarehouseQuery::build(&registry).unwrap()).await.unwrap();
        assert!(matches!(outcome, SetupOutcome::SkippedTestMode { .. }));
        assert!(db.journal().is_empty());
        assert!(!db.view_exists("dw_sale_line"));
    }

    #[tokio::test]
    async fn failed_setup_leaves_previous_view() {
        let (db, manager) = installed().await;
        db.inject_fault(
            StatementKind::CreateUniqueIndex,
            WarehouseError::database("execute", "53100", "could not extend file"),
        );
        let err = manager
            .setup(&WarehouseQuery::build(&registry()).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, WarehouseError::Database { ref code, .. } if code == "53100"));
        assert!(db.view_exists("dw_sale_line"));
        assert_eq!(db.unique_index_column("dw_sale_line").as_deref(), Some("id"));
    }

    #[tokio::test]
    async fn first_refresh_falls_back_to_blocking() {
        let (db, manager) = installed().await;
        let report = refreshed(manager.refresh().await.unwrap());
        assert_eq!(report.mode, RefreshMode::Blocking);
        assert_eq!(report.fallback, Some(FallbackReason::Unsupported));
        assert_eq!(db.snapshot("dw_sale_line").unwrap().len(), 1);

        let journal = db.journal();
        let kinds: Vec<&JournalEntry> = journal.iter().collect();
        assert!(matches!(kinds[0], JournalEntry::Begin(_)));
        assert!(matches!(
            kinds[1],
            JournalEntry::Execute { kind: StatementKind::RefreshConcurrently, .. }
        ));
        assert!(matches!(kinds[2], JournalEntry::Failed { code: Some(c), .. } if c == "0A000"));
        assert!(matches!(kinds[3], JournalEntry::Rollback(_)));
        assert!(matches!(kinds[4], JournalEntry::Begin(_)));
        assert!(matches!(kinds[5], JournalEntry::Execute { kind: StatementKind::Refresh, .. }));
        assert!(matches!(kinds[6], JournalEntry::Commit(_)));
        assert_eq!(kinds.len(), 7);
    }

    #[tokio::test]
    async fn populated_view_refreshes_concurrently() {
        let (db, manager) = installed().await;
        manager.refresh().await.unwrap();
        db.clear_journal();

        let report = refreshed(manager.refresh().await.unwrap());
        assert_eq!(report.mode, RefreshMode::Concurrent);
        assert_eq!(report.fallback, None);
        assert!(report.finished_at >= report.started_at);
        assert!(!db.journal().iter().any(|e| matches!(e, JournalEntry::Rollback(_))));
    }

    #[tokio::test]
    async fn other_errors_propagate_without_fallback() {
        let (db, manager) = installed().await;
        manager.refresh().await.unwrap();
        let before = db.snapshot("dw_sale_line");
        db.update("sale_line", 10, "quantity", 5);
        db.clear_journal();

        db.inject_fault(
            StatementKind::RefreshConcurrently,
            WarehouseError::database("execute", "40P01", "deadlock detected"),
        );
        let err = manager.refresh().await.unwrap_err();
        assert!(matches!(err, WarehouseError::Database { ref code, .. } if code == "40P01"));
        assert_eq!(db.committed_statements(StatementKind::Refresh), 0);
        assert!(!db.journal().iter().any(|e| matches!(e, JournalEntry::Commit(_))));
        assert_eq!(db.snapshot("dw_sale_line"), before);
    }

    #[tokio::test]
    async fn failed_blocking_fallback_propagates() {
        let (db, manager) = installed().await;
        db.inject_fault(
            StatementKind::Refresh,
            WarehouseError::database("execute", "53100", "could not extend file"),
        );
        let err = manager.refresh().await.unwrap_err();
        assert!(matches!(err, WarehouseError::Database { ref code, .. } if code == "53100"));
        assert!(!db.is_populated("dw_sale_line"));
    }

    #[tokio::test]
    async fn old_server_skips_the_concurrent_attempt() {
        let registry = registry();
        let db = database(&registry).with_server_version(90300);
        let manager = SnapshotManager::new(db.clone(), WarehouseConfig::default());
        manager.setup(&WarehouseQuery::build(&registry).unwrap()).await.unwrap();
        db.clear_journal();

        let report = refreshed(manager.refresh().await.unwrap());
        assert_eq!(report.mode, RefreshMode::Blocking);
        assert_eq!(report.fallback, Some(FallbackReason::ServerVersion));
        assert_eq!(db.committed_statements(StatementKind::RefreshConcurrently), 0);
        assert!(!db.journal().iter().any(|e| matches!(
            e,
            JournalEntry::Execute { kind: StatementKind::RefreshConcurrently, .. }
        )));
    }

    #[tokio::test]
    async fn recent_server_still_classifies_errors() {
        let registry = registry();
        let db = database(&registry).with_server_version(160004);
        let manager = SnapshotManager::new(db.clone(), WarehouseConfig::default());
        manager.setup(&WarehouseQuery::build(&registry).unwrap()).await.unwrap();

        let report = refreshed(manager.refresh().await.unwrap());
        assert_eq!(report.fallback, Some(FallbackReason::Unsupported));
    }

    #[tokio::test]
    async fn missing_view_named_after_the_keyword_propagates() {
        let registry = registry();
        let db = database(&registry);
        let config = WarehouseConfig::default().with_view_name("dw_concurrently_lines");
        let manager = SnapshotManager::new(db.clone(), config);

        let err = manager.refresh().await.unwrap_err();
        assert!(matches!(err, WarehouseError::Database { ref code, .. } if code == "42P01"));
        assert!(!db.journal().iter().any(|e| matches!(
            e,
            JournalEntry::Execute { kind: StatementKind::Refresh, .. }
        )));
        let rollbacks = db
            .journal()
            .iter()
            .filter(|e| matches!(e, JournalEntry::Rollback(_)))
            .count();
        assert_eq!(rollbacks, 1);
    }

    #[tokio::test]
    async fn view_named_after_the_keyword_still_falls_back() {
        let registry = registry();
        let db = database(&registry);
        seed(&db);
        let config = WarehouseConfig::default().with_view_name("dw_concurrently_lines");
        let manager = SnapshotManager::new(db.clone(), config);
        manager.setup(&WarehouseQuery::build(&registry).unwrap()).await.unwrap();

        let report = refreshed(manager.refresh().await.unwrap());
        assert_eq!(report.mode, RefreshMode::Blocking);
        assert_eq!(report.fallback, Some(FallbackReason::Unsupported));
        assert_eq!(db.snapshot("dw_concurrently_lines").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_driver_is_a_logged_skip() {
        let manager: SnapshotManager<MemoryWarehouse> =
            SnapshotManager::without_backend(WarehouseConfig::default());
        assert_eq!(
            manager.refresh().await.unwrap(),
            RefreshOutcome::Skipped {
                view: "dw_sale_line".into()
            }
        );
        let outcome = manager
            .setup(&WarehouseQuery::build(&registry()).unwrap())
            .await
            .unwrap();
        assert!(matches!(outcome, SetupOutcome::SkippedNoBackend { .. }));
    }

    #[test]
    fn report_serializes_with_status_tag() {
        let report = RefreshReport {
            refresh_id: RefreshId::new(),
            view: "dw_sale_line".into(),
            mode: RefreshMode::Blocking,
            fallback: Some(FallbackReason::Unsupported),
            started_at: Utc::now(),
            finished_at: Utc::now(),
        };
        let json = serde_json::to_value(RefreshOutcome::Refreshed(report)).unwrap();
        assert_eq!(json["status"], "refreshed");
        assert_eq!(json["mode"], "blocking");
        assert_eq!(json["fallback"], "unsupported");
    }

    fn sqlstate() -> impl Strategy<Value = &'static str> {
        prop::sample::select(vec![
            "0A000", "42601", "42P01", "55000", "23505", "40P01", "53100", "08006",
        ])
    }

    fn engine_message() -> impl Strategy<Value = &'static str> {
        prop::sample::select(vec![
            "CONCURRENTLY cannot be used when the materialized view is not populated",
            "syntax error at or near \"CONCURRENTLY\"",
            "cannot refresh materialized view \"public.dw_sale_line\" concurrently",
            "relation \"dw_concurrently_lines\" does not exist",
            "could not create unique index \"unique_id\"",
            "deadlock detected",
        ])
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, ..ProptestConfig::default() })]

        /// Unsupported errors roll back and retry blocking.
        /// Anything else propagates uncommitted.
        #[test]
        fn refresh_retry_law(code in sqlstate(), message in engine_message()) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            runtime.block_on(async {
                let (db, manager) = installed().await;
                manager.refresh().await.unwrap();
                db.clear_journal();

                let injected = WarehouseError::database("execute", code, message);
                let unsupported = injected.is_concurrent_refresh_unsupported();
                db.inject_fault(StatementKind::RefreshConcurrently, injected);

                let result = manager.refresh().await;
                let rollbacks = db
                    .journal()
                    .iter()
                    .filter(|e| matches!(e, JournalEntry::Rollback(_)))
                    .count();
                prop_assert_eq!(rollbacks, 1);
                if unsupported {
                    let report = refreshed(result.unwrap());
                    prop_assert_eq!(report.mode, RefreshMode::Blocking);
                    prop_assert_eq!(db.committed_statements(StatementKind::Refresh), 1);
                } else {
                    let err = result.unwrap_err();
                    prop_assert!(
                        matches!(err, WarehouseError::Database { code: ref c, .. } if c == code),
                        "unexpected error: {:?}",
                        err
                    );
                    prop_assert_eq!(db.committed_statements(StatementKind::Refresh), 0);
                    let committed = db
                        .journal()
                        .iter()
                        .any(|e| matches!(e, JournalEntry::Commit(_)));
                    prop_assert!(!committed);
                }
                Ok(())
            })?;
        }
    }
}
