//! Pilot persistence loop.
//!
//! Coalesces record changes per callsign into periodic DB writes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;

use crate::backoff::Backoff;
use crate::persistence::{pilots as pilots_db, Database};
use crate::state::{AppState, PersistOp};

const PERSIST_FLUSH_SECS: u64 = 1;
const PERSIST_DB_BACKOFF_MAX_SECS: u64 = 30;

pub async fn run_persist_loop(
    db: Database,
    app_state: Arc<AppState>,
    mut rx: mpsc::Receiver<PersistOp>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = interval(Duration::from_secs(PERSIST_FLUSH_SECS));
    let mut backoff = Backoff::new(
        Duration::from_secs(PERSIST_FLUSH_SECS),
        Duration::from_secs(PERSIST_DB_BACKOFF_MAX_SECS),
    );
    let mut pending: HashMap<String, PersistOp> = HashMap::new();
    app_state.mark_loop_heartbeat("persist");

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("Persistence loop shutting down");
                break;
            }
            maybe_op = rx.recv() => {
                match maybe_op {
                    Some(op) => {
                        pending.insert(op.callsign().to_string(), op);
                        drain_queue(&mut pending, &mut rx);
                        merge_overflow(&app_state, &mut pending);
                    }
                    None => {
                        tracing::info!("Persistence channel closed");
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                app_state.mark_loop_heartbeat("persist");
                merge_overflow(&app_state, &mut pending);
                if !backoff.ready() {
                    continue;
                }
                if let Err(err) = flush_pending(&db, &mut pending).await {
                    let delay = backoff.fail();
                    tracing::warn!(
                        "Pilot persistence flush failed: {} (backing off {:?})",
                        err,
                        delay
                    );
                } else {
                    backoff.reset();
                }
            }
        }
    }

    drain_queue(&mut pending, &mut rx);
    merge_overflow(&app_state, &mut pending);
    if let Err(err) = flush_pending(&db, &mut pending).await {
        tracing::warn!("Pilot persistence final flush failed: {}", err);
    }
}

fn drain_queue(pending: &mut HashMap<String, PersistOp>, rx: &mut mpsc::Receiver<PersistOp>) {
    while let Ok(op) = rx.try_recv() {
        pending.insert(op.callsign().to_string(), op);
    }
}

fn merge_overflow(state: &AppState, pending: &mut HashMap<String, PersistOp>) {
    // overflow was queued after anything already pending
    pending.extend(state.take_persist_overflow());
}

pub(crate) async fn flush_pending(
    db: &Database,
    pending: &mut HashMap<String, PersistOp>,
) -> Result<()> {
    if pending.is_empty() {
        return Ok(());
    }

    let batch = std::mem::take(pending);
    let mut tx = match db.pool().begin().await {
        Ok(tx) => tx,
        Err(err) => {
            requeue(pending, batch);
            return Err(err.into());
        }
    };

    let mut write_error: Option<anyhow::Error> = None;
    for op in batch.values() {
        let result = match op {
            PersistOp::Upsert(record) => pilots_db::upsert_record_tx(&mut tx, record).await,
            PersistOp::Delete(callsign) => pilots_db::delete_record_tx(&mut tx, callsign).await,
        };
        if let Err(err) = result {
            write_error = Some(err);
            break;
        }
    }

    if let Some(err) = write_error {
        tx.rollback().await.ok();
        requeue(pending, batch);
        return Err(err);
    }

    if let Err(err) = tx.commit().await {
        requeue(pending, batch);
        return Err(err.into());
    }

    Ok(())
}

/// Put a failed batch back without overwriting newer ops.
fn requeue(pending: &mut HashMap<String, PersistOp>, batch: HashMap<String, PersistOp>) {
    for (callsign, op) in batch {
        pending.entry(callsign).or_insert(op);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::init_database;
    use acdm_core::models::{Pilot, PilotRecord};
    use chrono::Utc;

    #[tokio::test]
    async fn flush_writes_latest_op_per_callsign() {
        let db = init_database(":memory:", 1).await.unwrap();
        let mut pending = HashMap::new();
        let record = PilotRecord::from_local(Pilot::new("AFR12", Utc::now()));
        pending.insert("AFR12".to_string(), PersistOp::Upsert(record.clone()));
        pending.insert(
            "KLM3".to_string(),
            PersistOp::Upsert(PilotRecord::from_local(Pilot::new("KLM3", Utc::now()))),
        );
        flush_pending(&db, &mut pending).await.unwrap();
        assert!(pending.is_empty());

        pending.insert("KLM3".to_string(), PersistOp::Delete("KLM3".to_string()));
        flush_pending(&db, &mut pending).await.unwrap();

        let stored = pilots_db::load_all_records(db.pool()).await.unwrap();
        assert_eq!(stored, vec![record]);
    }

    #[test]
    fn requeue_keeps_newer_ops() {
        let mut pending = HashMap::new();
        pending.insert("AFR12".to_string(), PersistOp::Delete("AFR12".to_string()));
        let mut batch = HashMap::new();
        batch.insert(
            "AFR12".to_string(),
            PersistOp::Upsert(PilotRecord::from_local(Pilot::new("AFR12", Utc::now()))),
        );
        batch.insert("DLH1".to_string(), PersistOp::Delete("DLH1".to_string()));

        requeue(&mut pending, batch);
        assert_eq!(pending.len(), 2);
        assert_eq!(pending["AFR12"], PersistOp::Delete("AFR12".to_string()));
    }
}
