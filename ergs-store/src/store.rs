use camino::Utf8Path;
use chrono::{DateTime, Utc};
use ergs_core::time::{format_rfc3339, parse_rfc3339};
use ergs_core::{Block, Metadata};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, Row, SqlitePool};

use crate::error::{classify_query_error, StorageError};
use crate::migrate;

/// Ordering requested from [`Store::search`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    /// `created_at DESC`, used for empty queries and the firehose.
    TimeDesc,
    /// `bm25 ASC, created_at DESC`, used for non-empty FTS queries.
    Relevance,
}

/// Inclusive lower/upper bound on `created_at`, appended as
/// `AND created_at >= start AND created_at <= end` when present.
#[derive(Debug, Clone, Copy, Default)]
pub struct DateRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn from_start(start: DateTime<Utc>) -> Self {
        Self { start: Some(start), end: None }
    }

    fn append_sql(&self, sql: &mut String, binds: &mut Vec<String>) {
        if let Some(start) = self.start {
            sql.push_str(" AND created_at >= ?");
            binds.push(format_rfc3339(start));
        }
        if let Some(end) = self.end {
            sql.push_str(" AND created_at <= ?");
            binds.push(format_rfc3339(end));
        }
    }
}

/// Aggregate statistics for one store.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stats {
    pub count: i64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

#[derive(FromRow)]
struct BlockRow {
    id: String,
    text: String,
    source: String,
    datasource_type: String,
    metadata_json: String,
    created_at: String,
    updated_at: String,
}

impl BlockRow {
    fn into_block(self) -> Result<Block, StorageError> {
        let metadata: Metadata = serde_json::from_str(&self.metadata_json)
            .map_err(|e| StorageError::InvalidQuery(format!("corrupt metadata: {e}")))?;
        Ok(Block {
            id: self.id,
            text: self.text,
            source: self.source,
            ds_type: self.datasource_type,
            created_at: parse_rfc3339(&self.created_at)
                .map_err(|e| StorageError::Db(sqlx::Error::Decode(Box::new(e))))?,
            updated_at: parse_rfc3339(&self.updated_at)
                .map_err(|e| StorageError::Db(sqlx::Error::Decode(Box::new(e))))?,
            metadata,
        })
    }
}

const BLOCK_COLUMNS: &str =
    "id, text, source, datasource_type, metadata_json, created_at, updated_at";

/// One embedded database for one datasource instance.
///
/// Owns a `sqlx::SqlitePool`; lazily created on first access by the
/// [`crate::StorageManager`] and closed by it.
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Opens (creating if absent) the SQLite file at `path`, applying
    /// performance-hint pragmas. Does **not** run migrations or gate on
    /// pending ones: callers (the manager) decide that.
    pub async fn open(path: &Utf8Path) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_std_path())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .pragma("temp_store", "MEMORY")
            .pragma("cache_size", "-65536")
            .pragma("mmap_size", "268435456");

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    #[cfg(test)]
    pub(crate) async fn open_in_memory() -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub(crate) async fn pending_migrations(&self) -> Result<Vec<&'static str>, StorageError> {
        migrate::pending(&self.pool).await
    }

    pub(crate) async fn apply_migrations(&self) -> Result<usize, StorageError> {
        migrate::apply_all(&self.pool).await
    }

    /// Upserts one block. On conflict by `id`, overwrites `text`,
    /// `metadata_json`, `datasource_type` and `updated_at`; `created_at` is
    /// left untouched. Returns the persisted row, so callers fan out the
    /// *actual* stored timestamps rather than the submitted ones.
    pub async fn store_block(&self, block: &Block, ds_type: &str) -> Result<Block, StorageError> {
        let mut tx = self.pool.begin().await?;
        let persisted = upsert_block(&mut tx, block, ds_type).await?;
        tx.commit().await?;
        Ok(persisted)
    }

    /// Upserts many blocks in a single transaction; rolls back entirely on
    /// any error.
    pub async fn store_blocks(
        &self,
        blocks: &[Block],
        ds_type: &str,
    ) -> Result<Vec<Block>, StorageError> {
        let mut tx = self.pool.begin().await?;
        let mut persisted = Vec::with_capacity(blocks.len());
        for block in blocks {
            persisted.push(upsert_block(&mut tx, block, ds_type).await?);
        }
        tx.commit().await?;
        Ok(persisted)
    }

    /// Searches this store. Empty `query` scans `blocks` ordered by
    /// `created_at DESC`; otherwise `MATCH`es the FTS index, ordered per
    /// `order`. `query` is always bound as a parameter, never concatenated.
    pub async fn search(
        &self,
        query: &str,
        limit: i64,
        order: Order,
        date_range: &DateRange,
    ) -> Result<Vec<Block>, StorageError> {
        let rows = if query.trim().is_empty() {
            let mut sql = format!("SELECT {BLOCK_COLUMNS} FROM blocks WHERE 1 = 1");
            let mut binds = Vec::new();
            date_range.append_sql(&mut sql, &mut binds);
            sql.push_str(" ORDER BY created_at DESC LIMIT ?");

            let mut q = sqlx::query_as::<_, BlockRow>(&sql);
            for b in &binds {
                q = q.bind(b);
            }
            q.bind(limit).fetch_all(&self.pool).await?
        } else {
            let order_clause = match order {
                Order::TimeDesc => "blocks.created_at DESC",
                Order::Relevance => "bm25(blocks_fts) ASC, blocks.created_at DESC",
            };
            let mut sql = format!(
                "SELECT blocks.id, blocks.text, blocks.source, blocks.datasource_type, \
                 blocks.metadata_json, blocks.created_at, blocks.updated_at \
                 FROM blocks_fts JOIN blocks ON blocks.id = blocks_fts.id \
                 WHERE blocks_fts MATCH ?"
            );
            let mut binds = vec![query.to_string()];
            date_range.append_sql(&mut sql, &mut binds);
            sql.push_str(&format!(" ORDER BY {order_clause} LIMIT ?"));

            let mut q = sqlx::query_as::<_, BlockRow>(&sql);
            for b in &binds {
                q = q.bind(b);
            }
            match q.bind(limit).fetch_all(&self.pool).await {
                Ok(rows) => rows,
                Err(e) => return Err(classify_query_error(query, e)),
            }
        };

        rows.into_iter().map(BlockRow::into_block).collect()
    }

    /// Equivalent to an empty-query search with a lower bound on `created_at`.
    pub async fn get_blocks_since(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Block>, StorageError> {
        self.search("", limit, Order::TimeDesc, &DateRange::from_start(since))
            .await
    }

    pub async fn stats(&self) -> Result<Stats, StorageError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count, MIN(created_at) AS oldest, MAX(created_at) AS newest FROM blocks",
        )
        .fetch_one(&self.pool)
        .await?;

        let count: i64 = row.get("count");
        let oldest: Option<String> = row.get("oldest");
        let newest: Option<String> = row.get("newest");

        Ok(Stats {
            count,
            oldest: oldest.and_then(|s| parse_rfc3339(&s).ok()),
            newest: newest.and_then(|s| parse_rfc3339(&s).ok()),
        })
    }

    pub async fn optimize(&self) -> Result<(), StorageError> {
        sqlx::query("INSERT INTO blocks_fts(blocks_fts) VALUES ('optimize')")
            .execute(&self.pool)
            .await?;
        sqlx::query("PRAGMA optimize").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn analyze(&self) -> Result<(), StorageError> {
        sqlx::query("ANALYZE").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn vacuum(&self) -> Result<(), StorageError> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn wal_checkpoint(&self, truncate: bool) -> Result<(), StorageError> {
        let mode = if truncate { "TRUNCATE" } else { "PASSIVE" };
        sqlx::query(&format!("PRAGMA wal_checkpoint({mode})"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

async fn upsert_block(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    block: &Block,
    ds_type: &str,
) -> Result<Block, StorageError> {
    let metadata_json = serde_json::to_string(&block.metadata)
        .map_err(|e| StorageError::InvalidQuery(format!("unserializable metadata: {e}")))?;
    let now = format_rfc3339(Utc::now());

    let row = sqlx::query_as::<_, BlockRow>(&format!(
        "INSERT INTO blocks (id, text, source, datasource_type, metadata_json, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
         ON CONFLICT(id) DO UPDATE SET \
            text = excluded.text, \
            datasource_type = excluded.datasource_type, \
            metadata_json = excluded.metadata_json, \
            updated_at = excluded.updated_at \
         RETURNING {BLOCK_COLUMNS}"
    ))
    .bind(&block.id)
    .bind(&block.text)
    .bind(&block.source)
    .bind(ds_type)
    .bind(&metadata_json)
    .bind(format_rfc3339(block.created_at))
    .bind(&now)
    .fetch_one(&mut **tx)
    .await?;

    sqlx::query("DELETE FROM blocks_fts WHERE id = ?1")
        .bind(&block.id)
        .execute(&mut **tx)
        .await?;
    sqlx::query(
        "INSERT INTO blocks_fts (id, text, source, datasource_type, metadata_json) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(&block.id)
    .bind(&block.text)
    .bind(&block.source)
    .bind(ds_type)
    .bind(&metadata_json)
    .execute(&mut **tx)
    .await?;

    row.into_block()
}
