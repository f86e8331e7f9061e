use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ergs_core::DataSource;
use ergs_firehose::Hub;
use ergs_store::StorageManager;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bridge::EventBridge;
use crate::error::WarehouseError;
use crate::pipeline::persist_and_fanout;

const FETCH_CHANNEL_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Running,
    Stopped,
}

struct Registration {
    ds: Arc<dyn DataSource>,
    interval: Duration,
    handle: Option<JoinHandle<()>>,
    cancel: Option<CancellationToken>,
}

/// Per-datasource ingestion scheduler: one loop per registered datasource,
/// optionally an optimize loop, optionally an event bridge, all cancelable
/// as a group via [`Warehouse::stop`].
pub struct Warehouse {
    manager: Arc<StorageManager>,
    hub: Option<Arc<Hub>>,
    bridge: Option<Arc<EventBridge>>,
    optimize_interval: Option<Duration>,
    datasources: RwLock<HashMap<String, Registration>>,
    state: RwLock<State>,
    parent_cancel: RwLock<Option<CancellationToken>>,
    optimize_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Warehouse {
    pub fn new(
        manager: Arc<StorageManager>,
        hub: Option<Arc<Hub>>,
        bridge: Option<Arc<EventBridge>>,
        optimize_interval: Option<Duration>,
    ) -> Self {
        Self {
            manager,
            hub,
            bridge,
            optimize_interval,
            datasources: RwLock::new(HashMap::new()),
            state: RwLock::new(State::Idle),
            parent_cancel: RwLock::new(None),
            optimize_handle: Mutex::new(None),
        }
    }

    /// Registers a datasource. If the warehouse is already running and
    /// `interval` is non-zero, spawns its loop immediately; otherwise the
    /// loop is spawned by a subsequent [`Self::start`].
    pub async fn add_datasource(&self, name: impl Into<String>, ds: Arc<dyn DataSource>, interval: Duration) {
        let name = name.into();
        let running = *self.state.read().await == State::Running;

        let (handle, cancel) = if running && !interval.is_zero() {
            let parent = self.parent_cancel.read().await.clone().expect("running implies a parent token");
            let child = parent.child_token();
            let handle = self.spawn_loop(name.clone(), ds.clone(), interval, child.clone());
            (Some(handle), Some(child))
        } else {
            (None, None)
        };

        self.datasources
            .write()
            .await
            .insert(name, Registration { ds, interval, handle, cancel });
    }

    /// Stops the datasource's loop (if any), removes it from the registry,
    /// and calls `close()` on it. Persisted data is untouched.
    pub async fn remove_datasource(&self, name: &str) {
        let mut registration = {
            let mut datasources = self.datasources.write().await;
            datasources.remove(name)
        };
        if let Some(reg) = registration.take() {
            if let Some(cancel) = reg.cancel {
                cancel.cancel();
            }
            if let Some(handle) = reg.handle {
                let _ = handle.await;
            }
            if let Err(err) = reg.ds.close().await {
                log::warn!("closing datasource {name}: {err}");
            }
        }
    }

    /// Starts every registered loop. Requires at least one datasource and
    /// fails with [`WarehouseError::AlreadyRunning`] if already running.
    pub async fn start(&self) -> Result<(), WarehouseError> {
        {
            let state = self.state.read().await;
            if *state == State::Running {
                return Err(WarehouseError::AlreadyRunning);
            }
        }
        if self.datasources.read().await.is_empty() {
            return Err(WarehouseError::NoDatasources);
        }

        let parent = CancellationToken::new();
        *self.parent_cancel.write().await = Some(parent.clone());

        let mut datasources = self.datasources.write().await;
        for (name, reg) in datasources.iter_mut() {
            if reg.interval.is_zero() {
                continue;
            }
            let child = parent.child_token();
            let handle = self.spawn_loop(name.clone(), reg.ds.clone(), reg.interval, child.clone());
            reg.handle = Some(handle);
            reg.cancel = Some(child);
        }
        drop(datasources);

        if let Some(optimize_interval) = self.optimize_interval {
            let manager = self.manager.clone();
            let cancel = parent.child_token();
            let handle = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(optimize_interval);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = ticker.tick() => {
                            if let Err(err) = manager.optimize_all().await {
                                log::warn!("optimize_all failed: {err}");
                            }
                        }
                    }
                }
            });
            *self.optimize_handle.lock().await = Some(handle);
        }

        *self.state.write().await = State::Running;
        Ok(())
    }

    fn spawn_loop(
        &self,
        name: String,
        ds: Arc<dyn DataSource>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = self.manager.clone();
        let hub = self.hub.clone();
        let bridge = self.bridge.clone();
        let ds_type = ds.kind().to_string();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        run_fetch_cycle(&name, &ds, &ds_type, &manager, hub.as_deref(), bridge.as_deref(), cancel.clone()).await;
                    }
                }
            }
        })
    }

    /// Cancels every loop, awaits them, stops the optimize loop and the
    /// event bridge. A no-op when not running; safe to call twice.
    pub async fn stop(&self) {
        {
            let state = self.state.read().await;
            if *state != State::Running {
                return;
            }
        }

        if let Some(parent) = self.parent_cancel.read().await.as_ref() {
            parent.cancel();
        }

        let mut datasources = self.datasources.write().await;
        for reg in datasources.values_mut() {
            if let Some(handle) = reg.handle.take() {
                let _ = handle.await;
            }
        }
        drop(datasources);

        if let Some(handle) = self.optimize_handle.lock().await.take() {
            let _ = handle.await;
        }

        if let Some(bridge) = &self.bridge {
            bridge.stop().await;
        }

        *self.state.write().await = State::Stopped;
    }
}

async fn run_fetch_cycle(
    name: &str,
    ds: &Arc<dyn DataSource>,
    ds_type: &str,
    manager: &StorageManager,
    hub: Option<&Hub>,
    bridge: Option<&EventBridge>,
    cancel: CancellationToken,
) {
    let (tx, mut rx) = mpsc::channel(FETCH_CHANNEL_CAPACITY);

    let producer = {
        let ds = ds.clone();
        let cancel = cancel.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            if let Err(err) = ds.fetch_blocks(cancel, tx).await {
                log::warn!("fetch_blocks for {name} failed: {err}");
            }
        })
    };

    while let Some(block) = rx.recv().await {
        persist_and_fanout(manager, hub, bridge, name, ds_type, block).await;
    }

    let _ = producer.await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use camino::Utf8PathBuf;
    use ergs_core::{Block, DataSourceError, Metadata};
    use tempfile::tempdir;
    use tokio::sync::mpsc::Sender;

    struct OnceSource {
        name: String,
    }

    #[async_trait]
    impl DataSource for OnceSource {
        fn kind(&self) -> &str {
            "test"
        }

        fn name(&self) -> &str {
            &self.name
        }

        fn block_prototype(&self) -> Block {
            Block::new("proto", "", &self.name, "test", Metadata::new())
        }

        async fn fetch_blocks(
            &self,
            _cancel: CancellationToken,
            out: Sender<Block>,
        ) -> Result<(), DataSourceError> {
            let block = Block::new("1", "hello", &self.name, "test", Metadata::new());
            out.send(block).await.ok();
            Ok(())
        }
    }

    async fn manager() -> Arc<StorageManager> {
        let dir = tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        std::mem::forget(dir);
        Arc::new(StorageManager::open(root).await.unwrap())
    }

    #[tokio::test]
    async fn start_requires_at_least_one_datasource() {
        let warehouse = Warehouse::new(manager().await, None, None, None);
        assert!(matches!(warehouse.start().await, Err(WarehouseError::NoDatasources)));
    }

    #[tokio::test]
    async fn second_start_while_running_fails() {
        let manager = manager().await;
        let warehouse = Warehouse::new(manager, None, None, None);
        warehouse
            .add_datasource("ds", Arc::new(OnceSource { name: "ds".into() }), Duration::from_secs(3600))
            .await;
        warehouse.start().await.unwrap();
        assert!(matches!(warehouse.start().await, Err(WarehouseError::AlreadyRunning)));
        warehouse.stop().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let manager = manager().await;
        let warehouse = Warehouse::new(manager, None, None, None);
        warehouse
            .add_datasource("ds", Arc::new(OnceSource { name: "ds".into() }), Duration::from_secs(3600))
            .await;
        warehouse.start().await.unwrap();
        warehouse.stop().await;
        warehouse.stop().await;
    }

    #[tokio::test]
    async fn fetched_block_is_persisted() {
        let manager = manager().await;
        let warehouse = Warehouse::new(manager.clone(), None, None, None);
        warehouse
            .add_datasource("ds", Arc::new(OnceSource { name: "ds".into() }), Duration::from_millis(10))
            .await;
        warehouse.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        warehouse.stop().await;

        let store = manager.ensure_store("ds").await.unwrap();
        let stats = store.stats().await.unwrap();
        assert!(stats.count >= 1);
    }
}
