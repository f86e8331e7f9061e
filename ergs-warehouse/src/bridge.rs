use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use ergs_core::{Block, Metadata};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::UnixListener;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::error::WarehouseError;

const WRITE_DEADLINE: Duration = Duration::from_secs(2);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcEnvelope<'a> {
    Block {
        id: &'a str,
        datasource: &'a str,
        ds_type: &'a str,
        created_at: DateTime<Utc>,
        text: &'a str,
        metadata: &'a Metadata,
    },
    Heartbeat {
        ts: DateTime<Utc>,
    },
    #[allow(dead_code)]
    Info {
        message: String,
    },
    #[allow(dead_code)]
    Error {
        message: String,
        detail: Option<String>,
    },
}

/// A local IPC stream-socket publisher for out-of-process consumers.
/// Strictly one-way: warehouse to consumers.
pub struct EventBridge {
    path: Utf8PathBuf,
    connections: RwLock<HashMap<u64, OwnedWriteHalf>>,
    next_id: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl EventBridge {
    /// Binds the listener at `path` (unlinking a stale socket file first),
    /// then spawns the accept loop and the 30s heartbeat loop.
    pub async fn bind_and_start(path: impl Into<Utf8PathBuf>) -> Result<Arc<Self>, WarehouseError> {
        let path = path.into();
        if path.as_std_path().exists() {
            let _ = tokio::fs::remove_file(path.as_std_path()).await;
        }
        let listener = UnixListener::bind(path.as_std_path()).map_err(WarehouseError::BridgeBind)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = tokio::fs::set_permissions(
                path.as_std_path(),
                std::fs::Permissions::from_mode(0o660),
            )
            .await;
        }

        let bridge = Arc::new(Self {
            path,
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            tasks: Mutex::new(Vec::new()),
        });

        let accept_bridge = bridge.clone();
        let accept_task = tokio::spawn(async move { accept_bridge.run_accept_loop(listener).await });

        let heartbeat_bridge = bridge.clone();
        let heartbeat_task = tokio::spawn(async move { heartbeat_bridge.run_heartbeat_loop().await });

        bridge.tasks.lock().await.extend([accept_task, heartbeat_task]);
        Ok(bridge)
    }

    async fn run_accept_loop(self: Arc<Self>, listener: UnixListener) {
        loop {
            let (stream, _addr) = match listener.accept().await {
                Ok(pair) => pair,
                Err(err) => {
                    log::warn!("event bridge accept error: {err}");
                    continue;
                }
            };
            let (mut read_half, write_half) = stream.into_split();
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            self.connections.write().await.insert(id, write_half);

            let bridge = self.clone();
            tokio::spawn(async move {
                let mut discard = [0u8; 256];
                loop {
                    use tokio::io::AsyncReadExt;
                    match read_half.read(&mut discard).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => continue,
                    }
                }
                bridge.connections.write().await.remove(&id);
            });
        }
    }

    async fn run_heartbeat_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
        loop {
            ticker.tick().await;
            self.broadcast(&IpcEnvelope::Heartbeat { ts: Utc::now() }).await;
        }
    }

    pub async fn publish_block(&self, block: &Block, ds_name: &str, ds_type: &str) {
        self.broadcast(&IpcEnvelope::Block {
            id: &block.id,
            datasource: ds_name,
            ds_type,
            created_at: block.created_at,
            text: &block.text,
            metadata: &block.metadata,
        })
        .await;
    }

    async fn broadcast(&self, envelope: &IpcEnvelope<'_>) {
        let Ok(mut line) = serde_json::to_string(envelope) else {
            return;
        };
        line.push('\n');

        let mut dead = Vec::new();
        let mut connections = self.connections.write().await;
        for (id, writer) in connections.iter_mut() {
            let write = tokio::time::timeout(WRITE_DEADLINE, writer.write_all(line.as_bytes())).await;
            if !matches!(write, Ok(Ok(()))) {
                dead.push(*id);
            }
        }
        for id in dead {
            connections.remove(&id);
        }
    }

    /// Closes the listener, drops every connection, and removes the socket
    /// file. Safe to call more than once.
    pub async fn stop(&self) {
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        self.connections.write().await.clear();
        let _ = tokio::fs::remove_file(self.path.as_std_path()).await;
    }
}
