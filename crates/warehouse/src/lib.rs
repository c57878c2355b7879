//! `saledw-warehouse` — the sale line snapshot.
//!
//! - [`definition`]: the flattened view over sale lines, as a typed query value
//! - [`query`]: joins, expressions and SELECT rendering
//! - [`statement`]: the DDL and refresh statements sent to the engine
//! - [`snapshot`]: setup and refresh with the blocking fallback
//! - [`backend`]: Postgres (feature `postgres`) and an in-memory engine

pub mod backend;
pub mod config;
pub mod definition;
pub mod error;
pub mod query;
pub mod snapshot;
pub mod statement;

pub use backend::{MemoryWarehouse, UnitOfWork, WarehouseBackend};
#[cfg(feature = "postgres")]
pub use backend::PgWarehouse;
pub use config::{ConfigError, WarehouseConfig};
pub use definition::WarehouseQuery;
pub use error::{DbErrorKind, WarehouseError, WarehouseResult};
pub use snapshot::{
    FallbackReason, RefreshMode, RefreshOutcome, RefreshReport, SetupOutcome, SnapshotManager,
};
pub use statement::{SnapshotStatement, StatementKind};
