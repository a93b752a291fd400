//! Backend synchronisation loop.
//!
//! Ticks every second and runs the update cycle every
//! `update_cycle_seconds`. The backend version check runs first and again
//! after every server change.

use std::sync::Arc;
use std::time::Duration;

use acdm_core::models::Pilot;
use acdm_core::{
    coalesce_flightplan_updates, delta_to_backend, merge_backend_pilots,
    merge_flightplan_updates, LocalEffect, PilotUpdate, SyncDecision,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::time::interval;

use acdm_backend::ApiCheck;

use crate::backoff::Backoff;
use crate::state::{apply_plan, ApiStatus, AppState};

const API_CHECK_BACKOFF_BASE_SECS: u64 = 2;
const API_CHECK_BACKOFF_MAX_SECS: u64 = 60;

/// Counters of one update cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub sent: usize,
    pub failed: usize,
    pub added: usize,
    pub updated: usize,
    pub consolidated: usize,
    pub removed: usize,
    pub posted: usize,
    pub patched: usize,
}

pub async fn run_sync_loop(state: Arc<AppState>, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = interval(Duration::from_secs(1));
    let mut api_backoff = Backoff::new(
        Duration::from_secs(API_CHECK_BACKOFF_BASE_SECS),
        Duration::from_secs(API_CHECK_BACKOFF_MAX_SECS),
    );
    let mut counter: u64 = 0;

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("Sync loop shutting down");
                break;
            }
            _ = ticker.tick() => {
                state.mark_loop_heartbeat("sync");
                if state.is_paused() {
                    continue;
                }

                if !state.api_status().checked && api_backoff.ready() {
                    match check_web_api(&state).await {
                        Ok(_) => api_backoff.reset(),
                        Err(err) => {
                            let delay = api_backoff.fail();
                            tracing::warn!(
                                "Backend version check failed: {} (attempt {}, retrying in {:?})",
                                err,
                                api_backoff.failures(),
                                delay
                            );
                        }
                    }
                }

                counter = counter.wrapping_add(1);
                if counter % state.update_cycle_seconds().max(1) != 0 {
                    continue;
                }

                let report = run_update_cycle(&state).await;
                if report != CycleReport::default() {
                    tracing::debug!("Update cycle finished: {:?}", report);
                }
            }
        }
    }
}

/// Check that the backend speaks the same major version.
///
/// Returns whether writes are allowed. A transport error leaves the check
/// pending so the loop retries it.
pub async fn check_web_api(state: &AppState) -> Result<bool> {
    let check = state
        .backend()
        .check_web_api(state.config().plugin_major)
        .await?;
    let valid = check.is_valid();
    let message = check.message();
    if valid {
        tracing::info!("{}", message);
    } else {
        tracing::error!("{}", message);
    }

    let server = match check {
        ApiCheck::Valid(server) => Some(server),
        _ => None,
    };
    state.set_api_status(ApiStatus {
        checked: true,
        valid,
        message,
        server,
    });
    Ok(valid)
}

/// One pass over the pilot map.
///
/// Works on a snapshot so no lock is held across backend calls:
/// queued updates are sent, local flight plans merged, backend data
/// consolidated, and local deltas pushed when this client may write.
pub async fn run_update_cycle(state: &AppState) -> CycleReport {
    let now = Utc::now();
    let mut report = CycleReport::default();
    let mut pilots = state.snapshot_pilots();
    let can_write = state.can_write();

    for action in state.take_pending_actions() {
        let effect = match pilots.get_mut(&action.callsign) {
            Some(record) => apply_plan(record, &action.plan, action.queued_at),
            None => LocalEffect::Keep,
        };
        let pilot = pilots
            .get(&action.callsign)
            .map(|record| record.consolidated.clone())
            .unwrap_or_else(|| Pilot::new(action.callsign.clone(), now));
        if effect == LocalEffect::Remove {
            pilots.remove(&action.callsign);
        }

        if !can_write {
            tracing::debug!(
                "Dropping {} update(s) for {}: not allowed to write",
                action.plan.updates.len(),
                action.callsign
            );
            continue;
        }
        for update in &action.plan.updates {
            tracing::info!(
                "Sending {} update: {} - {}",
                update.name(),
                action.callsign,
                update_value(update)
            );
            match state.backend().send_update(&pilot, update).await {
                Ok(()) => report.sent += 1,
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(
                        "Failed to send {} update for {}: {:#}",
                        update.name(),
                        action.callsign,
                        err
                    );
                }
            }
        }
    }

    let airports = state.active_airports();
    let updates = coalesce_flightplan_updates(state.take_flightplan_updates(), &airports);
    let merge = merge_flightplan_updates(&mut pilots, updates);
    for callsign in &merge.added {
        tracing::info!("Added {}", callsign);
    }
    for callsign in &merge.updated {
        tracing::debug!("Updated data of {}", callsign);
    }
    report.added = merge.added.len();
    report.updated = merge.updated.len();

    if state.api_status().valid && !airports.is_empty() {
        match state.backend().fetch_pilots(&airports).await {
            Ok(backend) => {
                let merge = merge_backend_pilots(&mut pilots, backend);
                for callsign in &merge.consolidated {
                    tracing::debug!("Consolidated {}", callsign);
                }
                for callsign in &merge.removed {
                    tracing::info!("Removed inactive pilot {}", callsign);
                }
                for err in &merge.errors {
                    tracing::error!(
                        "Callsign mismatch during consolidation: {}, {}",
                        err.local,
                        err.server
                    );
                }
                report.consolidated = merge.consolidated.len();
                report.removed = merge.removed.len();
            }
            Err(err) => tracing::warn!("Failed to fetch pilots: {:#}", err),
        }
    }

    if can_write {
        let tolerance = state.position_tolerance_m();
        for record in pilots.values() {
            match delta_to_backend(record, tolerance) {
                SyncDecision::None => {}
                SyncDecision::InitialPilotData => {
                    tracing::info!("Sending initial pilot data: {}", record.callsign());
                    match state.backend().post_initial_pilot(&record.local).await {
                        Ok(()) => report.posted += 1,
                        Err(err) => tracing::warn!(
                            "Failed to post {}: {:#}",
                            record.callsign(),
                            err
                        ),
                    }
                }
                SyncDecision::Patch(body) => {
                    tracing::debug!("Updating {} with {}", record.callsign(), body);
                    match state.backend().patch_pilot(record.callsign(), &body).await {
                        Ok(()) => report.patched += 1,
                        Err(err) => tracing::warn!(
                            "Failed to update {}: {:#}",
                            record.callsign(),
                            err
                        ),
                    }
                }
            }
        }
    }

    state.replace_pilots(pilots);
    report
}

fn clock(time: DateTime<Utc>) -> String {
    time.format("%H%M").to_string()
}

/// Logged value of a queued update.
fn update_value(update: &PilotUpdate) -> String {
    match *update {
        PilotUpdate::UpdateExot(minutes) => format!("{} min", minutes),
        PilotUpdate::UpdateTobt(time)
        | PilotUpdate::UpdateAsat(time)
        | PilotUpdate::UpdateAsrt(time)
        | PilotUpdate::UpdateAobt(time)
        | PilotUpdate::UpdateAort(time)
        | PilotUpdate::UpdateAtot(time) => clock(time),
        PilotUpdate::UpdateTobtConfirmed(time) => {
            time.map(clock).unwrap_or_else(|| "unset".to_string())
        }
        PilotUpdate::ResetTobt
        | PilotUpdate::ResetAsat
        | PilotUpdate::ResetAsrt
        | PilotUpdate::ResetTobtConfirmed
        | PilotUpdate::ResetAort
        | PilotUpdate::ResetAobt
        | PilotUpdate::ResetPilot => "reset".to_string(),
    }
}
