//! Models the sale line module reads, and how they are registered.

use saledw_core::{RegistryResult, StaticRegistry};
use saledw_warehouse::WarehouseConfig;
use saledw_warehouse::definition::model;

/// Module that provides `sale.channel`.
pub const SALE_CHANNEL_MODULE: &str = "sale_channel";

/// Models every deployment has.
pub const REQUIRED_MODELS: [&str; 10] = [
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
];

/// Register the required models, plus `sale.channel` when its module is installed.
pub fn register_models(
    registry: &mut StaticRegistry,
    config: &WarehouseConfig,
) -> RegistryResult<()> {
    for name in REQUIRED_MODELS {
        registry.register(name)?;
    }
    if config.has_module(SALE_CHANNEL_MODULE) {
        registry.register(model::SALE_CHANNEL)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use saledw_core::EntityRegistry;

    #[test]
    fn channel_follows_installed_modules() {
        let mut without = StaticRegistry::new();
        register_models(&mut without, &WarehouseConfig::default()).unwrap();
        assert_eq!(without.len(), REQUIRED_MODELS.len());
        assert!(!without.contains(model::SALE_CHANNEL));

        let mut with = StaticRegistry::new();
        let config = WarehouseConfig::default().with_module(SALE_CHANNEL_MODULE);
        register_models(&mut with, &config).unwrap();
        assert_eq!(with.table(model::SALE_CHANNEL).unwrap().table(), "sale_channel");
    }

    #[test]
    fn registration_is_repeatable() {
        let mut registry = StaticRegistry::new();
        let config = WarehouseConfig::default();
        register_models(&mut registry, &config).unwrap();
        register_models(&mut registry, &config).unwrap();
        assert_eq!(registry.len(), REQUIRED_MODELS.len());
    }
}
