//! Engine boundary: units of work that execute snapshot statements.
//!
//! Every unit of work is independent of any other one, so a unit left in an
//! aborted state by a failed statement is never reused: the caller rolls it
//! back and begins a fresh one.

mod eval;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::{JournalEntry, MemoryWarehouse, Row};
#[cfg(feature = "postgres")]
pub use postgres::PgWarehouse;

use async_trait::async_trait;

use crate::error::WarehouseResult;
use crate::statement::SnapshotStatement;

/// A database engine that can host the snapshot.
#[async_trait]
pub trait WarehouseBackend: Send + Sync {
    type UnitOfWork: UnitOfWork;

    /// Begin a new, independent unit of work.
    async fn begin(&self) -> WarehouseResult<Self::UnitOfWork>;

    /// Numeric server version (`server_version_num`), if the engine reports one.
    async fn server_version(&self) -> WarehouseResult<Option<u32>> {
        Ok(None)
    }
}

/// One transaction.
#[async_trait]
pub trait UnitOfWork: Send + Sized {
    async fn execute(&mut self, statement: &SnapshotStatement) -> WarehouseResult<()>;

    async fn commit(self) -> WarehouseResult<()>;

    async fn rollback(self) -> WarehouseResult<()>;
}

#[async_trait]
impl<B: WarehouseBackend> WarehouseBackend for std::sync::Arc<B> {
    type UnitOfWork = B::UnitOfWork;

    async fn begin(&self) -> WarehouseResult<Self::UnitOfWork> {
        (**self).begin().await
    }

    async fn server_version(&self) -> WarehouseResult<Option<u32>> {
        (**self).server_version().await
    }
}
