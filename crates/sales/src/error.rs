use saledw_core::RegistryError;
use saledw_warehouse::{ConfigError, WarehouseError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SaleLineError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type SaleLineResult<T> = Result<T, SaleLineError>;
