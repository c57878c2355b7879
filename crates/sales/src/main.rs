use anyhow::{Context, bail};
use saledw_core::StaticRegistry;
use saledw_sales::{SaleLine, register_models};
use saledw_warehouse::{PgWarehouse, SnapshotManager, WarehouseConfig};

const USAGE: &str = "usage: saledw <setup|refresh|sql>";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    saledw_observability::init();

    let command = std::env::args().nth(1).unwrap_or_default();
    let config = WarehouseConfig::from_env().context("invalid configuration")?;

    let mut registry = StaticRegistry::new();
    register_models(&mut registry, &config)?;

    let manager = match config.database_url.as_deref() {
        _ if command == "sql" => SnapshotManager::without_backend(config.clone()),
        Some(url) => {
            let backend = PgWarehouse::connect(url)
                .await
                .context("failed to connect to DATABASE_URL")?;
            SnapshotManager::new(backend, config.clone())
        }
        None => {
            tracing::warn!("DATABASE_URL not set; running without a database");
            SnapshotManager::without_backend(config.clone())
        }
    };
    let module = SaleLine::new(registry, manager);

    match command.as_str() {
        "setup" => {
            let outcome = module.build_data_warehouse().await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        "refresh" => {
            let outcome = module.refresh_data_warehouse().await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        "sql" => println!("{}", module.warehouse_sql()?),
        "" => bail!(USAGE),
        other => bail!("unknown command '{other}'; {USAGE}"),
    }
    Ok(())
}
