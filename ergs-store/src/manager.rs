use std::collections::HashMap;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use ergs_core::{Block, BlockPrototypeFactory, PassthroughFactory};
use tokio::sync::RwLock;

use crate::error::StorageError;
use crate::store::{Stats, Store};

/// Owns one [`Store`] per datasource name, lazily opening the backing
/// SQLite file the first time a datasource is touched.
///
/// Cloning is cheap: the manager is handed around as `Arc<StorageManager>`
/// by the warehouse and search layers.
pub struct StorageManager {
    root: Utf8PathBuf,
    stores: RwLock<HashMap<String, Arc<Store>>>,
    prototypes: RwLock<HashMap<String, Arc<dyn BlockPrototypeFactory>>>,
}

impl StorageManager {
    fn db_path(root: &Utf8Path, name: &str) -> Utf8PathBuf {
        root.join(format!("{name}.db"))
    }

    async fn new_empty(root: impl Into<Utf8PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        tokio::fs::create_dir_all(root.as_std_path()).await?;
        Ok(Self {
            root,
            stores: RwLock::new(HashMap::new()),
            prototypes: RwLock::new(HashMap::new()),
        })
    }

    /// Opens the manager over `root`, eagerly gating on every `*.db` file
    /// already present: each is opened just long enough to list pending
    /// migrations, then closed. Construction fails with
    /// [`StorageError::PendingMigrations`] naming the first store with
    /// unapplied migrations. Stores opened afterward via
    /// [`Self::ensure_store`] are migrated automatically if new, or gated
    /// the same way if pre-existing.
    pub async fn open(root: impl Into<Utf8PathBuf>) -> Result<Self, StorageError> {
        let manager = Self::new_empty(root).await?;
        let mut entries = tokio::fs::read_dir(manager.root.as_std_path()).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if path.extension().and_then(|e| e.to_str()) != Some("db") {
                continue;
            }
            let store = Store::open(&manager.root.join(format!("{stem}.db"))).await?;
            let pending = store.pending_migrations().await?;
            store.close().await;
            if !pending.is_empty() {
                return Err(StorageError::PendingMigrations {
                    datasource: stem.to_string(),
                    count: pending.len(),
                });
            }
        }
        Ok(manager)
    }

    /// Like [`Self::open`], but eagerly *applies* pending migrations to
    /// every `*.db` file already present under `root` instead of failing.
    pub async fn open_and_migrate(root: impl Into<Utf8PathBuf>) -> Result<Self, StorageError> {
        let manager = Self::new_empty(root).await?;
        let mut entries = tokio::fs::read_dir(manager.root.as_std_path()).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if path.extension().and_then(|e| e.to_str()) != Some("db") {
                continue;
            }
            let store = Store::open(&manager.root.join(format!("{stem}.db"))).await?;
            store.apply_migrations().await?;
            manager.stores.write().await.insert(stem.to_string(), Arc::new(store));
        }
        Ok(manager)
    }

    /// Registers a [`BlockPrototypeFactory`] used by [`Self::rehydrate`] to
    /// turn a generic `Block` read back from storage into the datasource's
    /// richer, concrete representation.
    pub async fn register_prototype(&self, kind: &str, factory: Arc<dyn BlockPrototypeFactory>) {
        self.prototypes.write().await.insert(kind.to_string(), factory);
    }

    /// Returns the store for `name`, opening it (double-checked) if this is
    /// the first access. Refuses with [`StorageError::PendingMigrations`] if
    /// an existing file has migrations that have not been applied, rather
    /// than silently applying them out from under a running datasource.
    pub async fn ensure_store(&self, name: &str) -> Result<Arc<Store>, StorageError> {
        if let Some(store) = self.stores.read().await.get(name) {
            return Ok(store.clone());
        }

        let mut stores = self.stores.write().await;
        if let Some(store) = stores.get(name) {
            return Ok(store.clone());
        }

        let path = Self::db_path(&self.root, name);
        let existed = path.as_std_path().exists();
        let store = Store::open(&path).await?;

        if existed {
            let pending = store.pending_migrations().await?;
            if !pending.is_empty() {
                return Err(StorageError::PendingMigrations {
                    datasource: name.to_string(),
                    count: pending.len(),
                });
            }
        } else {
            store.apply_migrations().await?;
        }

        let store = Arc::new(store);
        stores.insert(name.to_string(), store.clone());
        Ok(store)
    }

    /// Resolves the generic `Block` read back from a store into the richer
    /// shape its datasource would have produced, via the registered
    /// [`BlockPrototypeFactory`] for `kind`. Falls back to an identity
    /// passthrough when no factory was registered.
    pub async fn rehydrate(&self, kind: &str, block: &Block) -> Block {
        let resolved_source = block.resolved_source();
        match self.prototypes.read().await.get(kind) {
            Some(factory) => factory.rehydrate(block, &resolved_source),
            None => PassthroughFactory.rehydrate(block, &resolved_source),
        }
    }

    /// Names of every store opened so far this process.
    pub async fn open_datasources(&self) -> Vec<String> {
        self.stores.read().await.keys().cloned().collect()
    }

    /// Returns the store for `name` only if it has already been opened by a
    /// prior [`Self::ensure_store`] call; never opens it. The search layer
    /// uses this to restrict its fan-out to actually-open stores without
    /// inadvertently creating a store file for an unknown name.
    pub async fn get_open(&self, name: &str) -> Option<Arc<Store>> {
        self.stores.read().await.get(name).cloned()
    }

    pub async fn stats_all(&self) -> HashMap<String, Stats> {
        let stores = self.stores.read().await;
        let mut out = HashMap::with_capacity(stores.len());
        for (name, store) in stores.iter() {
            if let Ok(stats) = store.stats().await {
                out.insert(name.clone(), stats);
            }
        }
        out
    }

    pub async fn optimize_all(&self) -> Result<(), StorageError> {
        for store in self.stores.read().await.values() {
            store.optimize().await?;
        }
        Ok(())
    }

    pub async fn analyze_all(&self) -> Result<(), StorageError> {
        for store in self.stores.read().await.values() {
            store.analyze().await?;
        }
        Ok(())
    }

    pub async fn checkpoint_all(&self, truncate: bool) -> Result<(), StorageError> {
        for store in self.stores.read().await.values() {
            store.wal_checkpoint(truncate).await?;
        }
        Ok(())
    }

    /// Closes every opened store's connection pool. The manager remains
    /// usable afterward; stores are reopened lazily on next access.
    pub async fn close(&self) {
        let mut stores = self.stores.write().await;
        for (_, store) in stores.drain() {
            store.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ergs_core::Metadata;
    use tempfile::tempdir;

    #[tokio::test]
    async fn ensure_store_opens_and_migrates_new_files() {
        let dir = tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let manager = StorageManager::open(root).await.unwrap();

        let store = manager.ensure_store("github").await.unwrap();
        assert!(store.pending_migrations().await.unwrap().is_empty());
        assert_eq!(manager.open_datasources().await, vec!["github".to_string()]);
    }

    #[tokio::test]
    async fn ensure_store_is_idempotent_across_calls() {
        let dir = tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let manager = StorageManager::open(root).await.unwrap();

        let a = manager.ensure_store("slack").await.unwrap();
        let b = manager.ensure_store("slack").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn open_fails_when_an_existing_store_has_pending_migrations() {
        let dir = tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();

        // Create a bare db file without ever applying its migrations.
        let unmigrated = Store::open(&root.join("legacy.db")).await.unwrap();
        unmigrated.close().await;

        match StorageManager::open(root).await {
            Err(StorageError::PendingMigrations { datasource, count }) => {
                assert_eq!(datasource, "legacy");
                assert!(count >= 1);
            }
            Ok(_) => panic!("expected PendingMigrations, got Ok"),
            Err(other) => panic!("expected PendingMigrations, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn open_and_migrate_applies_pending_migrations_instead_of_failing() {
        let dir = tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();

        let unmigrated = Store::open(&root.join("legacy.db")).await.unwrap();
        unmigrated.close().await;

        let manager = StorageManager::open_and_migrate(root).await.unwrap();
        assert_eq!(manager.open_datasources().await, vec!["legacy".to_string()]);
    }

    #[tokio::test]
    async fn rehydrate_falls_back_to_passthrough() {
        let dir = tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let manager = StorageManager::open(root).await.unwrap();

        let block = Block::new("1", "hi", "src", "unregistered", Metadata::new());
        let rehydrated = manager.rehydrate("unregistered", &block).await;
        assert_eq!(rehydrated.id, block.id);
    }
}
