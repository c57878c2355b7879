//! Postgres-backed warehouse.
//!
//! Each unit of work is one transaction. Snapshot statements are sent as raw
//! SQL: Postgres does not accept bind parameters in DDL, and the view SELECT
//! is rendered with inline literals for that reason.
//!
//! ## Error Mapping
//!
//! SQLx errors are mapped through [`WarehouseError::from_sqlx`]:
//!
//! | SQLx Error | `WarehouseError` |
//! |------------|------------------|
//! | Database | `Database` with the SQLSTATE code and its class |
//! | PoolClosed / PoolTimedOut / Io | `Connection` |
//! | Other | `Connection` |
//!
//! ## Thread Safety
//!
//! `PgWarehouse` is `Send + Sync` and cheap to clone; the pool handles
//! connection sharing.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgConnection, PgPool, Postgres, Transaction};
use tracing::{debug, instrument};

use super::{UnitOfWork, WarehouseBackend};
use crate::error::{WarehouseError, WarehouseResult};
use crate::statement::SnapshotStatement;

#[derive(Debug, Clone)]
pub struct PgWarehouse {
    pool: Arc<PgPool>,
}

impl PgWarehouse {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect a small pool; snapshot maintenance needs one connection at a time.
    #[instrument(skip(database_url), err)]
    pub async fn connect(database_url: &str) -> WarehouseResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(database_url)
            .await
            .map_err(|e| WarehouseError::from_sqlx("connect", e))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl WarehouseBackend for PgWarehouse {
    type UnitOfWork = PgUnitOfWork;

    #[instrument(skip(self), err)]
    async fn begin(&self) -> WarehouseResult<PgUnitOfWork> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| WarehouseError::from_sqlx("begin", e))?;
        Ok(PgUnitOfWork { tx })
    }

    #[instrument(skip(self), err)]
    async fn server_version(&self) -> WarehouseResult<Option<u32>> {
        let raw: String = sqlx::query_scalar("SHOW server_version_num")
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| WarehouseError::from_sqlx("server_version", e))?;
        let version = raw.trim().parse::<u32>().ok();
        debug!(raw = %raw, ?version, "server version");
        Ok(version)
    }
}

/// An open Postgres transaction.
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    #[instrument(
        skip(self, statement),
        fields(kind = %statement.kind(), view = %statement.view()),
        err
    )]
    async fn execute(&mut self, statement: &SnapshotStatement) -> WarehouseResult<()> {
        let sql = statement.to_sql()?;
        let conn: &mut PgConnection = &mut self.tx;
        conn.execute(sqlx::raw_sql(&sql))
            .await
            .map_err(|e| WarehouseError::from_sqlx("execute", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn commit(self) -> WarehouseResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| WarehouseError::from_sqlx("commit", e))
    }

    #[instrument(skip(self), err)]
    async fn rollback(self) -> WarehouseResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| WarehouseError::from_sqlx("rollback", e))
    }
}
