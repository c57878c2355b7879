//! Hooks for downstream modules to change the warehouse query.
//!
//! Extensions run in registration order on the value returned by
//! [`WarehouseQuery::build`]; each one sees the joins, columns and filter
//! left by the previous ones.

use saledw_core::{EntityRegistry, RegistryError, RegistryResult};
use saledw_warehouse::WarehouseQuery;
use saledw_warehouse::definition::model;
use saledw_warehouse::query::{Expr, TableExt};

pub trait WarehouseExtension: Send + Sync {
    /// Short name, used in logs.
    fn name(&self) -> &str;

    fn extend(
        &self,
        query: &mut WarehouseQuery,
        registry: &dyn EntityRegistry,
    ) -> RegistryResult<()>;
}

/// Restrict the snapshot to the orders of one company.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompanyFilter {
    pub company: i64,
}

impl CompanyFilter {
    pub fn new(company: i64) -> Self {
        Self { company }
    }
}

impl WarehouseExtension for CompanyFilter {
    fn name(&self) -> &str {
        "company_filter"
    }

    fn extend(
        &self,
        query: &mut WarehouseQuery,
        _registry: &dyn EntityRegistry,
    ) -> RegistryResult<()> {
        let sale = query
            .table(model::SALE)
            .cloned()
            .ok_or_else(|| RegistryError::not_registered(model::SALE))?;
        query.and_filter(sale.col("company").eq(Expr::lit(self.company)));
        Ok(())
    }
}
