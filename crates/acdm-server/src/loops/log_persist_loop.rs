//! Writes forwarded log events to the `log_messages` table.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;

use crate::backoff::Backoff;
use crate::persistence::{log_messages, Database, LogRecord};
use crate::state::AppState;

const LOG_FLUSH_MILLIS: u64 = 500;
const LOG_DB_BACKOFF_MAX_SECS: u64 = 30;
/// Oldest messages are dropped beyond this while the database is failing.
const MAX_PENDING_LOGS: usize = 10_000;

pub async fn run_log_persist_loop(
    db: Database,
    app_state: Arc<AppState>,
    mut rx: mpsc::Receiver<LogRecord>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = interval(Duration::from_millis(LOG_FLUSH_MILLIS));
    let mut backoff = Backoff::new(
        Duration::from_millis(LOG_FLUSH_MILLIS),
        Duration::from_secs(LOG_DB_BACKOFF_MAX_SECS),
    );
    let mut pending: Vec<LogRecord> = Vec::new();

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("Log persistence loop shutting down");
                break;
            }
            _ = ticker.tick() => {
                app_state.mark_loop_heartbeat("log-persist");
                while let Ok(record) = rx.try_recv() {
                    pending.push(record);
                }
                if pending.is_empty() || !backoff.ready() {
                    continue;
                }
                if let Err(err) = flush_pending(&db, &mut pending).await {
                    let delay = backoff.fail();
                    tracing::warn!("Log flush failed: {} (backing off {:?})", err, delay);
                } else {
                    backoff.reset();
                }
            }
        }
    }

    while let Ok(record) = rx.try_recv() {
        pending.push(record);
    }
    if let Err(err) = flush_pending(&db, &mut pending).await {
        tracing::warn!("Log final flush failed: {}", err);
    }
}

async fn flush_pending(db: &Database, pending: &mut Vec<LogRecord>) -> Result<()> {
    if pending.is_empty() {
        return Ok(());
    }

    let batch = std::mem::take(pending);
    let result = write_batch(db, &batch).await;
    if result.is_err() {
        *pending = batch;
        if pending.len() > MAX_PENDING_LOGS {
            let excess = pending.len() - MAX_PENDING_LOGS;
            pending.drain(..excess);
        }
    }
    result
}

async fn write_batch(db: &Database, batch: &[LogRecord]) -> Result<()> {
    let mut tx = db.pool().begin().await?;
    for record in batch {
        if let Err(err) = log_messages::insert_message_tx(&mut tx, record).await {
            tx.rollback().await.ok();
            return Err(err);
        }
    }
    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::init_database;
    use chrono::Utc;

    #[tokio::test]
    async fn flush_stores_batch_in_order() {
        let db = init_database(":memory:", 1).await.unwrap();
        let mut pending = vec![
            LogRecord::new(Utc::now(), "datamanager", 1, "Added DLH4AB"),
            LogRecord::new(Utc::now(), "server", 2, "Failed to fetch pilots"),
        ];
        flush_pending(&db, &mut pending).await.unwrap();
        assert!(pending.is_empty());

        let stored = log_messages::recent_messages(db.pool(), 10).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].message, "Failed to fetch pilots");
        assert_eq!(stored[1].sender, "datamanager");
    }
}
