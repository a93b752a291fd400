//! SQLite pool and schema setup.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

pub const IN_MEMORY: &str = ":memory:";

/// Embedded schema migrations, applied in version order.
const MIGRATIONS: &[(i64, &str)] = &[(1, include_str!("../../migrations/001_init.sql"))];

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Highest applied schema version, 0 for an empty database.
    pub async fn schema_version(&self) -> Result<i64> {
        current_version(&self.pool).await
    }
}

/// Open the tracker database at `db_path` and bring its schema up to date.
///
/// `:memory:` opens a private in-memory database on a single connection that
/// is never recycled.
pub async fn init_database(db_path: &str, max_connections: u32) -> Result<Database> {
    let in_memory = db_path == IN_MEMORY;
    if !in_memory {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
    }

    let mut options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path))?
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5));
    let mut pool_options = SqlitePoolOptions::new();
    if in_memory {
        pool_options = pool_options
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
    } else {
        options = options.journal_mode(SqliteJournalMode::Wal);
        pool_options = pool_options.max_connections(max_connections.max(1));
    }

    info!("Opening tracker database: {}", db_path);
    let pool = pool_options
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database {}", db_path))?;

    migrate(&pool).await?;
    Ok(Database { pool })
}

async fn current_version(pool: &SqlitePool) -> Result<i64> {
    let (version,): (i64,) =
        sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM schema_version")
            .fetch_one(pool)
            .await?;
    Ok(version)
}

async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    let current = current_version(pool).await?;
    for &(version, sql) in MIGRATIONS {
        if version <= current {
            continue;
        }

        let mut tx = pool.begin().await?;
        sqlx::raw_sql(sql)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Schema migration {} failed", version))?;
        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)")
            .bind(version)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        info!("Applied schema migration {}", version);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_all_tables() {
        let db = init_database(IN_MEMORY, 4).await.unwrap();

        for table in ["pilots", "auth_tokens", "log_messages"] {
            let result: (i32,) = sqlx::query_as(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
            )
            .bind(table)
            .fetch_one(db.pool())
            .await
            .unwrap();
            assert_eq!(result.0, 1, "missing table {}", table);
        }
        assert_eq!(db.schema_version().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn applied_migrations_are_skipped() {
        let db = init_database(IN_MEMORY, 1).await.unwrap();
        migrate(db.pool()).await.unwrap();

        let (rows,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM schema_version")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }
}
