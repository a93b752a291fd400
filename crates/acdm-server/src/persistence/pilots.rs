//! Pilot record persistence.
//!
//! Each layer of a [`PilotRecord`] is stored as its own row so that the
//! server view can be absent.

use acdm_core::models::{Pilot, PilotRecord};
use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{Sqlite, SqlitePool};
use std::collections::BTreeMap;

const LAYER_CONSOLIDATED: &str = "consolidated";
const LAYER_LOCAL: &str = "local";
const LAYER_SERVER: &str = "server";

#[derive(sqlx::FromRow)]
struct PilotRow {
    callsign: String,
    layer: String,
    payload: String,
}

async fn upsert_layer_tx(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    layer: &str,
    pilot: &Pilot,
    callsign: &str,
) -> Result<()> {
    let payload = serde_json::to_string(pilot).context("Failed to encode pilot")?;
    sqlx::query(
        r#"
        INSERT INTO pilots (callsign, layer, origin, inactive, payload, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(callsign, layer) DO UPDATE SET
            origin = ?3, inactive = ?4, payload = ?5, updated_at = ?6
        "#,
    )
    .bind(callsign)
    .bind(layer)
    .bind(&pilot.origin)
    .bind(pilot.inactive)
    .bind(payload)
    .bind(Utc::now().to_rfc3339())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Upsert all layers of a record within an existing transaction.
pub async fn upsert_record_tx(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    record: &PilotRecord,
) -> Result<()> {
    let callsign = record.callsign();
    upsert_layer_tx(tx, LAYER_CONSOLIDATED, &record.consolidated, callsign).await?;
    upsert_layer_tx(tx, LAYER_LOCAL, &record.local, callsign).await?;
    match record.server.as_ref() {
        Some(server) => upsert_layer_tx(tx, LAYER_SERVER, server, callsign).await?,
        None => {
            sqlx::query("DELETE FROM pilots WHERE callsign = ?1 AND layer = ?2")
                .bind(callsign)
                .bind(LAYER_SERVER)
                .execute(&mut **tx)
                .await?;
        }
    }
    Ok(())
}

/// Remove every layer of a flight within an existing transaction.
pub async fn delete_record_tx(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    callsign: &str,
) -> Result<()> {
    sqlx::query("DELETE FROM pilots WHERE callsign = ?1")
        .bind(callsign)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Load all persisted records. Rows that fail to decode and records without
/// a local layer are skipped.
pub async fn load_all_records(pool: &SqlitePool) -> Result<Vec<PilotRecord>> {
    let rows = sqlx::query_as::<_, PilotRow>(
        "SELECT callsign, layer, payload FROM pilots ORDER BY callsign",
    )
    .fetch_all(pool)
    .await?;

    let mut layers: BTreeMap<String, [Option<Pilot>; 3]> = BTreeMap::new();
    for row in rows {
        let pilot: Pilot = match serde_json::from_str(&row.payload) {
            Ok(pilot) => pilot,
            Err(err) => {
                tracing::warn!("Skipping undecodable {} row of {}: {}", row.layer, row.callsign, err);
                continue;
            }
        };
        let slot = match row.layer.as_str() {
            LAYER_CONSOLIDATED => 0,
            LAYER_LOCAL => 1,
            LAYER_SERVER => 2,
            _ => continue,
        };
        layers.entry(row.callsign).or_default()[slot] = Some(pilot);
    }

    Ok(layers
        .into_values()
        .filter_map(|[consolidated, local, server]| {
            let local = local?;
            Some(PilotRecord {
                consolidated: consolidated.unwrap_or_else(|| local.clone()),
                local,
                server,
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::init_database;
    use chrono::Duration;

    fn record(callsign: &str) -> PilotRecord {
        let mut pilot = Pilot::new(callsign, Utc::now());
        pilot.origin = "EDDM".to_string();
        pilot.tobt = Some(Utc::now() + Duration::minutes(20));
        PilotRecord::from_local(pilot)
    }

    #[tokio::test]
    async fn records_round_trip_with_and_without_server_view() {
        let db = init_database(":memory:", 1).await.unwrap();

        let local_only = record("DLH1");
        let mut synced = record("DLH2");
        let mut server = synced.local.clone();
        server.tsat = Some(Utc::now() + Duration::minutes(25));
        synced.server = Some(server);

        let mut tx = db.pool().begin().await.unwrap();
        upsert_record_tx(&mut tx, &local_only).await.unwrap();
        upsert_record_tx(&mut tx, &synced).await.unwrap();
        tx.commit().await.unwrap();

        let loaded = load_all_records(db.pool()).await.unwrap();
        assert_eq!(loaded, vec![local_only, synced.clone()]);

        synced.server = None;
        let mut tx = db.pool().begin().await.unwrap();
        upsert_record_tx(&mut tx, &synced).await.unwrap();
        delete_record_tx(&mut tx, "DLH1").await.unwrap();
        tx.commit().await.unwrap();

        let loaded = load_all_records(db.pool()).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded[0].server.is_none());
    }
}
