use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ergs_core::time::truncate_to_second;
use ergs_search::{SearchParams, SearchResult, SearchService};
use ergs_store::DateRange;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use crate::envelope::{FirehoseEnvelope, SessionMode};
use crate::error::FirehoseError;
use crate::hub::Hub;

const DEFAULT_SNAPSHOT_LIMIT: u32 = 30;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Abstracts the full-duplex transport a session writes envelopes to.
/// Left to the embedding binary (HTTP upgrade, WebSocket, ...); this crate
/// is transport-agnostic by design.
#[async_trait]
pub trait FirehoseSink: Send {
    async fn send(&mut self, envelope: FirehoseEnvelope) -> Result<(), FirehoseError>;
}

fn snapshot_params(since: Option<DateTime<Utc>>, limit: u32) -> SearchParams {
    SearchParams {
        query: String::new(),
        datasource_filters: Vec::new(),
        page: 1,
        limit,
        date_range: match since {
            Some(since) => DateRange::from_start(since),
            None => DateRange::none(),
        },
        since,
    }
}

/// Keeps only blocks strictly newer than `since` at second precision.
fn dedup_since(result: &SearchResult, since: Option<DateTime<Utc>>) -> Vec<ergs_core::Block> {
    match since {
        None => result.ordered.clone(),
        Some(since) => {
            let since_floor = truncate_to_second(since);
            result
                .ordered
                .iter()
                .filter(|b| truncate_to_second(b.created_at) > since_floor)
                .cloned()
                .collect()
        }
    }
}

/// Runs one firehose session end to end: snapshot, mode selection, then
/// push-or-poll delivery with heartbeats, until `cancel` fires or the sink
/// errors.
pub struct FirehoseSession {
    search: Arc<SearchService>,
    hub: Option<Arc<Hub>>,
}

impl FirehoseSession {
    pub fn new(search: Arc<SearchService>, hub: Option<Arc<Hub>>) -> Self {
        Self { search, hub }
    }

    pub async fn run(
        &self,
        since: Option<DateTime<Utc>>,
        limit: Option<u32>,
        sink: &mut dyn FirehoseSink,
        cancel: CancellationToken,
    ) -> Result<(), FirehoseError> {
        let limit = limit.unwrap_or(DEFAULT_SNAPSHOT_LIMIT);
        let snapshot = self.search.search(&snapshot_params(since, limit)).await?;
        let delivered = dedup_since(&snapshot, since);

        let mut mode = if self.hub.is_some() { SessionMode::Push } else { SessionMode::Poll };

        let mut cursor = delivered
            .first()
            .map(|b| b.created_at)
            .unwrap_or_else(|| since.unwrap_or_else(Utc::now));

        sink.send(FirehoseEnvelope::Init {
            count: delivered.len(),
            blocks: delivered.iter().map(|b| b.to_view()).collect(),
            mode,
            since,
        })
        .await?;

        let mut heartbeat = interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await; // first tick fires immediately; consume it

        let mut push_rx = match (mode, &self.hub) {
            (SessionMode::Push, Some(hub)) => Some(hub.register().await),
            _ => None,
        };
        let mut poll_tick = interval(POLL_INTERVAL);
        poll_tick.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    if let (Some((id, _)), Some(hub)) = (&push_rx, &self.hub) {
                        hub.unregister(*id).await;
                    }
                    return Ok(());
                }
                _ = heartbeat.tick() => {
                    sink.send(FirehoseEnvelope::Heartbeat { ts: Utc::now() }).await?;
                }
                maybe_block = async {
                    match &mut push_rx {
                        Some((_, rx)) => rx.recv().await,
                        None => std::future::pending().await,
                    }
                }, if push_rx.is_some() => {
                    match maybe_block {
                        Some(block) => {
                            cursor = block.created_at;
                            sink.send(FirehoseEnvelope::Block { block: block.to_view() }).await?;
                        }
                        None => {
                            // subscription closed: downgrade to poll mode.
                            mode = SessionMode::Poll;
                            push_rx = None;
                        }
                    }
                }
                _ = poll_tick.tick(), if mode == SessionMode::Poll => {
                    let params = snapshot_params(Some(cursor), limit);
                    let result = self.search.search(&params).await?;
                    let fresh = dedup_since(&result, Some(cursor));
                    if !fresh.is_empty() {
                        cursor = fresh.iter().map(|b| b.created_at).max().unwrap_or(cursor);
                        sink.send(FirehoseEnvelope::BlockBatch {
                            count: fresh.len(),
                            blocks: fresh.iter().map(|b| b.to_view()).collect(),
                            since: cursor,
                        })
                        .await?;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use ergs_core::{time::parse_rfc3339, Block, Metadata};
    use ergs_store::StorageManager;
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[derive(Default)]
    struct RecordingSink {
        sent: Arc<Mutex<Vec<FirehoseEnvelope>>>,
    }

    #[async_trait]
    impl FirehoseSink for RecordingSink {
        async fn send(&mut self, envelope: FirehoseEnvelope) -> Result<(), FirehoseError> {
            self.sent.lock().unwrap().push(envelope);
            Ok(())
        }
    }

    async fn manager_with_block(ds: &str, id: &str, created_at: DateTime<Utc>) -> Arc<StorageManager> {
        let dir = tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        std::mem::forget(dir);
        let manager = Arc::new(StorageManager::open(root).await.unwrap());
        let store = manager.ensure_store(ds).await.unwrap();
        let mut block = Block::new(id, "hello", ds, "kind", Metadata::new());
        block.created_at = created_at;
        block.updated_at = created_at;
        store.store_block(&block, "kind").await.unwrap();
        manager
    }

    #[tokio::test]
    async fn since_with_subsecond_block_excludes_it_from_snapshot() {
        let t = parse_rfc3339("2024-06-01T12:00:00.500Z").unwrap();
        let manager = manager_with_block("ds_a", "b1", t).await;
        let search = Arc::new(SearchService::new(manager));
        let session = FirehoseSession::new(search, None);

        let since = parse_rfc3339("2024-06-01T12:00:00Z").unwrap();
        let snapshot = session.search.search(&snapshot_params(Some(since), 30)).await.unwrap();
        let delivered = dedup_since(&snapshot, Some(since));
        assert!(delivered.is_empty(), "sub-second sharing the cursor's second must not be redelivered");
    }

    #[tokio::test]
    async fn init_envelope_reports_poll_mode_without_hub() {
        let manager = Arc::new(StorageManager::open({
            let dir = tempdir().unwrap();
            let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
            std::mem::forget(dir);
            root
        }).await.unwrap());
        let search = Arc::new(SearchService::new(manager));
        let session = FirehoseSession::new(search, None);
        let mut sink = RecordingSink::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        session.run(None, Some(10), &mut sink, cancel).await.unwrap();

        let sent = sink.sent.lock().unwrap();
        assert!(matches!(sent[0], FirehoseEnvelope::Init { mode: SessionMode::Poll, .. }));
    }
}
