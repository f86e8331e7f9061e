use anyhow::Result;
use camino::Utf8PathBuf;
use ergs_core::time::parse_rfc3339;
use ergs_core::{Block, Metadata};
use ergs_store::{DateRange, Order, StorageManager};
use tempfile::tempdir;

#[tokio::test]
async fn upsert_preserves_created_at_across_a_manager_roundtrip() -> Result<()> {
    let dir = tempdir()?;
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    let manager = StorageManager::open(root).await?;
    let store = manager.ensure_store("ds_a").await?;

    let t = parse_rfc3339("2024-06-01T00:00:00Z")?;
    let mut block = Block::new("x", "a", "ds_a", "kind", Metadata::new());
    block.created_at = t;
    block.updated_at = t;
    store.store_block(&block, "kind").await?;

    let mut updated = block.clone();
    updated.text = "b".into();
    let persisted = store.store_block(&updated, "kind").await?;

    assert_eq!(persisted.created_at, t);
    assert_eq!(persisted.text, "b");
    assert!(persisted.updated_at >= t);
    Ok(())
}

#[tokio::test]
async fn fts_error_surfaces_friendly_message_for_forward_slash() -> Result<()> {
    let dir = tempdir()?;
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    let manager = StorageManager::open(root).await?;
    let store = manager.ensure_store("ds_a").await?;

    let err = store
        .search("KG7x/Quake3e", 10, Order::Relevance, &DateRange::none())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Forward slashes (/) are not allowed"));
    Ok(())
}
