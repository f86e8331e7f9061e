mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use config::ServerConfig;
use ergs_firehose::Hub;
use ergs_search::SearchService;
use ergs_store::StorageManager;
use ergs_warehouse::{EventBridge, Warehouse};

/// Wires up the storage manager, search service, hub, optional event
/// bridge, and warehouse scheduler. Concrete `DataSource` implementations,
/// HTTP routing, and REST response shapes are external collaborators;
/// register datasources on the returned [`Warehouse`] before calling
/// `start()`.
struct App {
    #[allow(dead_code)]
    manager: Arc<StorageManager>,
    #[allow(dead_code)]
    search: Arc<SearchService>,
    #[allow(dead_code)]
    hub: Arc<Hub>,
    warehouse: Arc<Warehouse>,
}

async fn bootstrap(config: &ServerConfig) -> anyhow::Result<App> {
    let storage_dir = Utf8PathBuf::from_path_buf(config.storage_dir.clone())
        .map_err(|path| anyhow::anyhow!("storage_dir is not valid UTF-8: {}", path.display()))?;
    let manager = Arc::new(StorageManager::open(storage_dir).await?);
    let search = Arc::new(SearchService::new(manager.clone()));
    let hub = Arc::new(Hub::new(config.hub_capacity));

    let bridge = match &config.event_bridge_socket {
        Some(path) => {
            let path = Utf8PathBuf::from_path_buf(path.clone())
                .map_err(|path| anyhow::anyhow!("event_bridge_socket is not valid UTF-8: {}", path.display()))?;
            Some(EventBridge::bind_and_start(path).await?)
        }
        None => None,
    };

    let optimize_interval = (config.optimize_interval_secs > 0)
        .then(|| Duration::from_secs(config.optimize_interval_secs));

    let warehouse = Arc::new(Warehouse::new(manager.clone(), Some(hub.clone()), bridge, optimize_interval));

    Ok(App { manager, search, hub, warehouse })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config_path = PathBuf::from("./ergs-data/config.toml");
    let config = ServerConfig::load_or_create(&config_path)?;
    log::info!("loaded config from {}", config_path.display());

    let app = bootstrap(&config).await?;

    // No datasources are registered here: the concrete `DataSource`
    // implementations that would call `app.warehouse.add_datasource(...)`
    // live outside this crate's scope.
    if app.warehouse.start().await.is_err() {
        log::warn!("warehouse has no registered datasources; idling with storage and search online");
    }

    log::info!("ergs-server ready");
    tokio::signal::ctrl_c().await?;
    log::info!("shutting down");
    app.warehouse.stop().await;
    app.manager.close().await;

    Ok(())
}
