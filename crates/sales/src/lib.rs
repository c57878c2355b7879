//! Sale line data warehouse module.
//!
//! Registers the models the warehouse reads, lets downstream modules extend
//! the view definition, and exposes the install and refresh entry points.

pub mod error;
pub mod extension;
pub mod models;
pub mod sale_line;

pub use error::{SaleLineError, SaleLineResult};
pub use extension::{CompanyFilter, WarehouseExtension};
pub use models::{REQUIRED_MODELS, SALE_CHANNEL_MODULE, register_models};
pub use sale_line::SaleLine;
