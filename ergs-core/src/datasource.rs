use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;

use crate::block::Block;

/// Errors a datasource's `fetch_blocks` may surface. Ingestion never aborts
/// on these: the warehouse logs and continues.
#[derive(Debug, Error)]
pub enum DataSourceError {
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("close failed: {0}")]
    Close(String),
}

/// A pluggable producer of [`Block`]s. Implementations are external
/// collaborators: Ergs consumes this trait, it does not ship concrete
/// datasources.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// The datasource *kind* (e.g. "github"); governs renderers and
    /// prototype factories.
    fn kind(&self) -> &str;

    /// The datasource *instance* name; the partition key selecting a store.
    fn name(&self) -> &str;

    /// Opaque, implementation-defined schema description surfaced to
    /// external callers (out of scope to interpret here).
    fn schema(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    /// A generic block used to register this datasource's rehydration
    /// factory with the storage manager's prototype registry.
    fn block_prototype(&self) -> Block;

    /// Sends zero or more blocks on `out` and returns once fetching is
    /// complete. Must respect `cancel` and close nothing it did not open.
    async fn fetch_blocks(
        &self,
        cancel: CancellationToken,
        out: Sender<Block>,
    ) -> Result<(), DataSourceError>;

    /// Releases any resources held by this datasource instance.
    async fn close(&self) -> Result<(), DataSourceError> {
        Ok(())
    }
}

/// Reconstructs a typed block variant from a generic row plus its resolved
/// `source`. Registered per datasource *kind* with the storage manager.
pub trait BlockPrototypeFactory: Send + Sync {
    fn rehydrate(&self, generic: &Block, resolved_source: &str) -> Block;
}

/// The identity factory: returns the generic block unchanged. Used as the
/// fallback when no prototype is registered for a kind.
pub struct PassthroughFactory;

impl BlockPrototypeFactory for PassthroughFactory {
    fn rehydrate(&self, generic: &Block, _resolved_source: &str) -> Block {
        generic.clone()
    }
}
