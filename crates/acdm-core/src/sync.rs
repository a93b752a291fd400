//! Merging local flight-plan data with backend data.

use crate::models::{FlightplanUpdate, Pilot, PilotRecord};
use crate::spatial::geodesic_distance;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// Pilot records keyed by callsign.
pub type PilotMap = BTreeMap<String, PilotRecord>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("callsign mismatch during consolidation: {local}, {server}")]
pub struct ConsolidationError {
    pub local: String,
    pub server: String,
}

/// Keep one update per callsign for flights departing an active airport.
///
/// The newest `issued_at` wins; on a tie the first seen update is kept.
/// Output order follows the first appearance of each callsign.
pub fn coalesce_flightplan_updates(
    updates: Vec<FlightplanUpdate>,
    active_airports: &[String],
) -> Vec<FlightplanUpdate> {
    let mut result: Vec<FlightplanUpdate> = Vec::with_capacity(updates.len());

    for update in updates {
        let departs_active = active_airports
            .iter()
            .any(|airport| airport.eq_ignore_ascii_case(&update.pilot.origin));
        if !departs_active {
            continue;
        }

        match result
            .iter_mut()
            .find(|existing| existing.pilot.callsign == update.pilot.callsign)
        {
            Some(existing) => {
                if update.issued_at > existing.issued_at {
                    *existing = update;
                }
            }
            None => result.push(update),
        }
    }

    result
}

/// Outcome of merging local flight-plan updates.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FlightplanMerge {
    pub added: Vec<String>,
    pub updated: Vec<String>,
}

/// Store coalesced flight-plan updates as the local view.
pub fn merge_flightplan_updates(
    pilots: &mut PilotMap,
    updates: Vec<FlightplanUpdate>,
) -> FlightplanMerge {
    let mut merge = FlightplanMerge::default();

    for update in updates {
        let callsign = update.pilot.callsign.clone();
        match pilots.get_mut(&callsign) {
            Some(record) => {
                record.local = update.pilot;
                merge.updated.push(callsign);
            }
            None => {
                pilots.insert(callsign.clone(), PilotRecord::from_local(update.pilot));
                merge.added.push(callsign);
            }
        }
    }

    merge
}

/// Outcome of merging one backend poll.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BackendMerge {
    pub consolidated: Vec<String>,
    pub removed: Vec<String>,
    pub errors: Vec<ConsolidationError>,
}

/// Apply the pilots returned by the backend to the tracked records.
///
/// A record is dropped when its last server view was inactive and the backend
/// no longer reports the flight.
pub fn merge_backend_pilots(pilots: &mut PilotMap, backend: Vec<Pilot>) -> BackendMerge {
    let mut merge = BackendMerge::default();
    let mut by_callsign: BTreeMap<String, Pilot> = backend
        .into_iter()
        .map(|pilot| (pilot.callsign.clone(), pilot))
        .collect();

    pilots.retain(|callsign, record| {
        let previously_inactive = record.server.as_ref().is_some_and(|server| server.inactive);

        match by_callsign.remove(&record.local.callsign) {
            Some(server) => {
                record.server = Some(server);
                match consolidate(record) {
                    Ok(()) => merge.consolidated.push(callsign.clone()),
                    Err(err) => merge.errors.push(err),
                }
                true
            }
            None if previously_inactive => {
                merge.removed.push(callsign.clone());
                false
            }
            None => true,
        }
    });

    merge
}

/// Rebuild the consolidated view from the local and server views.
pub fn consolidate(record: &mut PilotRecord) -> Result<(), ConsolidationError> {
    let Some(server) = record.server.as_ref() else {
        return Ok(());
    };
    if server.callsign != record.local.callsign {
        return Err(ConsolidationError {
            local: record.local.callsign.clone(),
            server: server.callsign.clone(),
        });
    }

    let local = &record.local;
    let merged = &mut record.consolidated;

    merged.inactive = server.inactive;
    merged.last_update = server.last_update;

    merged.eobt = server.eobt;
    merged.tobt = server.tobt;
    merged.tobt_state = server.tobt_state;
    merged.ctot = server.ctot;
    merged.ttot = server.ttot;
    merged.tsat = server.tsat;
    merged.exot = server.exot;
    merged.asat = server.asat;
    merged.aobt = server.aobt;
    merged.atot = server.atot;
    merged.asrt = server.asrt;
    merged.aort = server.aort;

    merged.measures = server.measures.clone();
    merged.has_booking = server.has_booking;
    merged.taxizone_is_taxiout = server.taxizone_is_taxiout;

    merged.latitude = local.latitude;
    merged.longitude = local.longitude;
    merged.origin = local.origin.clone();
    merged.destination = local.destination.clone();
    merged.runway = local.runway.clone();
    merged.sid = local.sid.clone();
    merged.ground_state = local.ground_state;

    Ok(())
}

/// What needs to be sent to the backend for one record.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncDecision {
    None,
    InitialPilotData,
    Patch(Value),
}

/// Compare the local view with the server view and build the write to send.
///
/// A position change only counts once the geodesic displacement exceeds
/// `position_tolerance_m`; a tolerance of zero reports any change.
pub fn delta_to_backend(record: &PilotRecord, position_tolerance_m: f64) -> SyncDecision {
    let local = &record.local;
    let Some(server) = record.server.as_ref() else {
        if local.callsign.is_empty() {
            return SyncDecision::None;
        }
        return SyncDecision::InitialPilotData;
    };

    let mut message = Map::new();
    let mut deltas = 0usize;

    if local.inactive != server.inactive {
        message.insert("inactive".to_string(), json!(local.inactive));
        deltas += 1;
    }

    if position_moved(local, server, position_tolerance_m) {
        let mut position = Map::new();
        if local.latitude != server.latitude {
            position.insert("lat".to_string(), json!(local.latitude));
        }
        if local.longitude != server.longitude {
            position.insert("lon".to_string(), json!(local.longitude));
        }
        deltas += position.len();
        insert_group(&mut message, "position", position);
    }

    let mut flightplan = Map::new();
    if local.origin != server.origin {
        flightplan.insert("adep".to_string(), json!(local.origin));
    }
    if local.destination != server.destination {
        flightplan.insert("ades".to_string(), json!(local.destination));
    }
    deltas += flightplan.len();
    insert_group(&mut message, "flightplan", flightplan);

    let mut clearance = Map::new();
    if local.runway != server.runway {
        clearance.insert("dep_rwy".to_string(), json!(local.runway));
    }
    if local.sid != server.sid {
        clearance.insert("sid".to_string(), json!(local.sid));
    }
    deltas += clearance.len();
    insert_group(&mut message, "clearance", clearance);

    if deltas == 0 {
        return SyncDecision::None;
    }

    message.insert("callsign".to_string(), json!(local.callsign));
    SyncDecision::Patch(Value::Object(message))
}

fn position_moved(local: &Pilot, server: &Pilot, tolerance_m: f64) -> bool {
    let changed = local.latitude != server.latitude || local.longitude != server.longitude;
    if !changed {
        return false;
    }
    if tolerance_m <= 0.0 {
        return true;
    }
    geodesic_distance(
        server.latitude,
        server.longitude,
        local.latitude,
        local.longitude,
    ) > tolerance_m
}

fn insert_group(message: &mut Map<String, Value>, key: &str, group: Map<String, Value>) {
    if !group.is_empty() {
        message.insert(key.to_string(), Value::Object(group));
    }
}
