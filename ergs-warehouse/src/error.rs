use ergs_store::StorageError;
use thiserror::Error;

/// Error taxonomy for the warehouse layer.
#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("warehouse is already running")]
    AlreadyRunning,

    #[error("start requires at least one registered datasource")]
    NoDatasources,

    #[error("binding event bridge socket: {0}")]
    BridgeBind(#[source] std::io::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
