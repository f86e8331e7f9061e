use ergs_core::Block;
use ergs_firehose::Hub;
use ergs_store::StorageManager;

use crate::bridge::EventBridge;

/// Persists one consumed block and fans it out to the hub and the event
/// bridge on success. Never propagates an error: failures are logged and
/// the ingestion loop continues.
pub(crate) async fn persist_and_fanout(
    manager: &StorageManager,
    hub: Option<&Hub>,
    bridge: Option<&EventBridge>,
    ds_name: &str,
    ds_type: &str,
    block: Block,
) {
    let store = match manager.ensure_store(ds_name).await {
        Ok(store) => store,
        Err(err) => {
            log::error!("opening store for {ds_name}: {err}");
            return;
        }
    };

    match store.store_block(&block, ds_type).await {
        Ok(persisted) => {
            if let Some(hub) = hub {
                hub.broadcast(persisted.clone()).await;
            }
            if let Some(bridge) = bridge {
                bridge.publish_block(&persisted, ds_name, ds_type).await;
            }
        }
        Err(err) => {
            log::error!("persisting block {} for {ds_name}: {err}", block.id);
        }
    }
}
