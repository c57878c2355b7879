//! `saledw-core` — shared building blocks for the sale line data warehouse.
//!
//! This crate contains **pure** primitives (no database access): the entity
//! registry boundary, table handles, SQL values and identifiers.

pub mod error;
pub mod id;
pub mod registry;
pub mod table;
pub mod value;

pub use error::{RegistryError, RegistryResult};
pub use id::RefreshId;
pub use registry::{EntityRegistry, StaticRegistry};
pub use table::TableRef;
pub use value::Value;
