//! Sale line module entry points.
//!
//! [`SaleLine`] ties the registry, the downstream extensions and the snapshot
//! manager together. The host calls [`SaleLine::register`] when the module is
//! registered and [`SaleLine::refresh_data_warehouse`] from its scheduler.

use saledw_core::EntityRegistry;
use saledw_warehouse::query::ParamStyle;
use saledw_warehouse::{
    RefreshOutcome, SetupOutcome, SnapshotManager, WarehouseBackend, WarehouseQuery,
};
use tracing::{debug, instrument};

use crate::error::SaleLineResult;
use crate::extension::WarehouseExtension;

pub struct SaleLine<R, B> {
    registry: R,
    manager: SnapshotManager<B>,
    extensions: Vec<Box<dyn WarehouseExtension>>,
}

impl<R: EntityRegistry, B: WarehouseBackend> SaleLine<R, B> {
    pub fn new(registry: R, manager: SnapshotManager<B>) -> Self {
        Self {
            registry,
            manager,
            extensions: Vec::new(),
        }
    }

    /// Add an extension; extensions apply in the order they are added.
    pub fn with_extension(mut self, extension: impl WarehouseExtension + 'static) -> Self {
        self.extensions.push(Box::new(extension));
        self
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn manager(&self) -> &SnapshotManager<B> {
        &self.manager
    }

    /// The view definition with every extension applied.
    pub fn warehouse_query(&self) -> SaleLineResult<WarehouseQuery> {
        let mut query = WarehouseQuery::build(&self.registry)?;
        for extension in &self.extensions {
            debug!(extension = extension.name(), "applying warehouse extension");
            extension.extend(&mut query, &self.registry)?;
        }
        Ok(query)
    }

    /// The SELECT the snapshot is created from, as sent to the engine.
    pub fn warehouse_sql(&self) -> SaleLineResult<String> {
        let rendered = self.warehouse_query()?.select().to_sql(ParamStyle::Inline)?;
        Ok(rendered.sql)
    }

    /// Module registration hook: build the snapshot unless in test mode.
    pub async fn register(&self) -> SaleLineResult<SetupOutcome> {
        if self.manager.config().test_mode {
            debug!("test mode, data warehouse not built");
            return Ok(SetupOutcome::SkippedTestMode {
                view: self.manager.config().view_name.clone(),
            });
        }
        self.build_data_warehouse().await
    }

    /// Recreate the empty snapshot from the current definition.
    #[instrument(skip(self), err)]
    pub async fn build_data_warehouse(&self) -> SaleLineResult<SetupOutcome> {
        let query = self.warehouse_query()?;
        Ok(self.manager.setup(&query).await?)
    }

    #[instrument(skip(self), err)]
    pub async fn refresh_data_warehouse(&self) -> SaleLineResult<RefreshOutcome> {
        Ok(self.manager.refresh().await?)
    }
}
