//! Log message sink storage.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Sqlite, SqlitePool};

/// One forwarded tracing event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct LogRecord {
    pub timestamp: String,
    pub sender: String,
    pub level: i64,
    pub message: String,
}

impl LogRecord {
    pub fn new(
        timestamp: DateTime<Utc>,
        sender: impl Into<String>,
        level: i64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: timestamp.to_rfc3339(),
            sender: sender.into(),
            level,
            message: message.into(),
        }
    }
}

pub async fn insert_message_tx(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    record: &LogRecord,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO log_messages (timestamp, sender, level, message) VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(&record.timestamp)
    .bind(&record.sender)
    .bind(record.level)
    .bind(&record.message)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Most recent messages, newest first.
pub async fn recent_messages(pool: &SqlitePool, limit: i64) -> Result<Vec<LogRecord>> {
    let rows = sqlx::query_as::<_, LogRecord>(
        "SELECT timestamp, sender, level, message FROM log_messages ORDER BY id DESC LIMIT ?1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::init_database;

    #[tokio::test]
    async fn returns_newest_messages_first() {
        let db = init_database(":memory:", 1).await.unwrap();
        let mut tx = db.pool().begin().await.unwrap();
        for message in ["first", "second", "third"] {
            let record = LogRecord::new(Utc::now(), "datamanager", 1, message);
            insert_message_tx(&mut tx, &record).await.unwrap();
        }
        tx.commit().await.unwrap();

        let recent = recent_messages(db.pool(), 2).await.unwrap();
        let messages: Vec<_> = recent.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(messages, vec!["third", "second"]);
    }
}
