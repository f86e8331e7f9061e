use chrono::Utc;
use ergs_core::time::format_rfc3339;
use sqlx::{Row, SqlitePool};

use crate::error::StorageError;

struct Migration {
    id: &'static str,
    sql: &'static str,
}

/// Embedded, ordered migration ledger. Appending a new `.sql` file means
/// adding one entry here: there is no directory scan at runtime, so the
/// pending-migrations gate is a pure, cheap diff against
/// `schema_migrations`.
const MIGRATIONS: &[Migration] = &[Migration {
    id: "0001_init",
    sql: include_str!("../migrations/0001_init.sql"),
}];

/// Ensures the `schema_migrations(id, applied_at)` ledger table exists.
/// Safe to call repeatedly.
pub(crate) async fn ensure_ledger(pool: &SqlitePool) -> Result<(), StorageError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            id TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn applied_ids(pool: &SqlitePool) -> Result<Vec<String>, StorageError> {
    let rows = sqlx::query("SELECT id FROM schema_migrations").fetch_all(pool).await?;
    Ok(rows.iter().map(|r| r.get::<String, _>("id")).collect())
}

/// Lists migrations not yet recorded in the ledger, in application order.
/// Does not mutate the database: used by the non-migrate constructor's
/// gate, which must refuse to open a store without side effects.
pub(crate) async fn pending(pool: &SqlitePool) -> Result<Vec<&'static str>, StorageError> {
    ensure_ledger(pool).await?;
    let applied = applied_ids(pool).await?;
    Ok(MIGRATIONS
        .iter()
        .filter(|m| !applied.iter().any(|a| a == m.id))
        .map(|m| m.id)
        .collect())
}

/// Applies every pending migration, each inside its own transaction,
/// recording it in the ledger immediately after.
pub(crate) async fn apply_all(pool: &SqlitePool) -> Result<usize, StorageError> {
    ensure_ledger(pool).await?;
    let applied = applied_ids(pool).await?;
    let mut count = 0;
    for migration in MIGRATIONS {
        if applied.iter().any(|a| a == migration.id) {
            continue;
        }
        let mut tx = pool.begin().await?;
        sqlx::raw_sql(migration.sql).execute(&mut *tx).await?;
        sqlx::query("INSERT INTO schema_migrations (id, applied_at) VALUES (?1, ?2)")
            .bind(migration.id)
            .bind(format_rfc3339(Utc::now()))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn pending_then_empty_after_apply() {
        let pool = memory_pool().await;
        let pending_before = pending(&pool).await.unwrap();
        assert_eq!(pending_before, vec!["0001_init"]);

        apply_all(&pool).await.unwrap();

        let pending_after = pending(&pool).await.unwrap();
        assert!(pending_after.is_empty());
    }

    #[tokio::test]
    async fn apply_all_is_idempotent() {
        let pool = memory_pool().await;
        assert_eq!(apply_all(&pool).await.unwrap(), 1);
        assert_eq!(apply_all(&pool).await.unwrap(), 0);
    }
}
