//! In-memory state shared by the API handlers and the background loops.
//!
//! The pilot map is authoritative. The update cycle works on a snapshot and
//! swaps it back in; controller actions that arrive meanwhile are kept in
//! `pending_actions` and re-applied to the new map.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use acdm_backend::{BackendClient, TokenState};
use acdm_core::models::{EcfmpFlowMeasure, FlightplanInput, FlightplanUpdate, Pilot, PilotRecord};
use acdm_core::{
    apply_local, detect_movement, plan_action, ActionError, ActionPlan, ClearanceAction,
    LocalEffect, PilotMap, PilotUpdate, ServerConfiguration,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::config::{Config, PluginConfig, MAX_UPDATE_CYCLE_SECONDS, MIN_UPDATE_CYCLE_SECONDS};
use crate::logging::LogControl;
use crate::master::{check_master_eligibility, MasterRefusal, SessionInfo};
use crate::persistence::Database;

/// Controller action applied locally and waiting for the next update cycle.
#[derive(Debug, Clone)]
pub struct QueuedAction {
    pub callsign: String,
    pub plan: ActionPlan,
    pub queued_at: DateTime<Utc>,
}

/// Write handed to the persistence loop.
#[derive(Debug, Clone, PartialEq)]
pub enum PersistOp {
    Upsert(PilotRecord),
    Delete(String),
}

impl PersistOp {
    pub fn callsign(&self) -> &str {
        match self {
            Self::Upsert(record) => record.callsign(),
            Self::Delete(callsign) => callsign,
        }
    }
}

/// Result of the last backend version check.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ApiStatus {
    pub checked: bool,
    pub valid: bool,
    pub message: String,
    pub server: Option<ServerConfiguration>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AuthStatus {
    pub token: Option<TokenState>,
    /// Browser URL of a pending authorization
    pub login_url: Option<String>,
}

/// Outcome of a controller action.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub plan: ActionPlan,
    /// Consolidated record after the action; `None` once the pilot was reset
    pub pilot: Option<Pilot>,
}

pub struct AppState {
    config: Config,
    backend: BackendClient,
    database: Option<Database>,
    log_control: Arc<LogControl>,
    pilots: Mutex<PilotMap>,
    pending_actions: Mutex<Vec<QueuedAction>>,
    flightplan_updates: Mutex<Vec<FlightplanUpdate>>,
    active_airports: RwLock<Vec<String>>,
    session: RwLock<SessionInfo>,
    api: RwLock<ApiStatus>,
    auth: RwLock<AuthStatus>,
    master: AtomicBool,
    paused: AtomicBool,
    update_cycle_seconds: AtomicU64,
    position_tolerance_m: RwLock<f64>,
    flow_measures: DashMap<i64, EcfmpFlowMeasure>,
    loop_heartbeats: DashMap<&'static str, DateTime<Utc>>,
    persist_tx: Option<mpsc::Sender<PersistOp>>,
    persist_overflow: Mutex<HashMap<String, PersistOp>>,
}

impl AppState {
    pub fn new(config: Config, plugin: &PluginConfig, log_control: Arc<LogControl>) -> Self {
        let server_url = config
            .server_url
            .clone()
            .unwrap_or_else(|| plugin.server_url.clone());
        Self {
            backend: BackendClient::new(server_url, None),
            config,
            database: None,
            log_control,
            pilots: Mutex::new(PilotMap::new()),
            pending_actions: Mutex::new(Vec::new()),
            flightplan_updates: Mutex::new(Vec::new()),
            active_airports: RwLock::new(Vec::new()),
            session: RwLock::new(SessionInfo::default()),
            api: RwLock::new(ApiStatus::default()),
            auth: RwLock::new(AuthStatus::default()),
            master: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            update_cycle_seconds: AtomicU64::new(clamp_cycle(plugin.update_cycle_seconds)),
            position_tolerance_m: RwLock::new(plugin.position_tolerance_m),
            flow_measures: DashMap::new(),
            loop_heartbeats: DashMap::new(),
            persist_tx: None,
            persist_overflow: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_database(mut self, database: Database) -> Self {
        self.database = Some(database);
        self
    }

    pub fn with_persistence(mut self, tx: mpsc::Sender<PersistOp>) -> Self {
        self.persist_tx = Some(tx);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn backend(&self) -> &BackendClient {
        &self.backend
    }

    pub fn database(&self) -> Option<&Database> {
        self.database.as_ref()
    }

    pub fn log_control(&self) -> &LogControl {
        &self.log_control
    }

    // --- role, pause and cycle settings ---

    pub fn is_master(&self) -> bool {
        self.master.load(Ordering::SeqCst)
    }

    /// Take the master role if the session and the backend allow it.
    pub fn request_master(&self) -> Result<(), MasterRefusal> {
        let session = self.session();
        check_master_eligibility(&session, &self.server_configuration())?;
        self.master.store(true, Ordering::SeqCst);
        tracing::info!("Switched to MASTER");
        Ok(())
    }

    pub fn release_master(&self) {
        self.master.store(false, Ordering::SeqCst);
        tracing::info!("Switched to SLAVE");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub fn update_cycle_seconds(&self) -> u64 {
        self.update_cycle_seconds.load(Ordering::Relaxed)
    }

    pub fn set_update_cycle_seconds(&self, seconds: u64) {
        let seconds = clamp_cycle(seconds);
        self.update_cycle_seconds.store(seconds, Ordering::Relaxed);
        tracing::info!("Changed update cycle to {} seconds", seconds);
    }

    pub fn position_tolerance_m(&self) -> f64 {
        *self
            .position_tolerance_m
            .read()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Writes go out only as master against a compatible backend.
    pub fn can_write(&self) -> bool {
        self.is_master() && self.api_status().valid
    }

    // --- backend connection ---

    pub fn api_status(&self) -> ApiStatus {
        self.api.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_api_status(&self, status: ApiStatus) {
        *self.api.write().unwrap_or_else(|e| e.into_inner()) = status;
    }

    pub fn server_configuration(&self) -> ServerConfiguration {
        self.api_status().server.unwrap_or_default()
    }

    /// Point the client at another backend; the version check runs again.
    pub fn change_server_address(&self, url: &str) -> String {
        let url = url.trim();
        self.set_paused(true);
        self.backend.set_base_url(url);
        self.set_api_status(ApiStatus::default());
        self.set_paused(false);
        tracing::info!("Changed URL to {}", url);
        format!("Changed vACDM URL: {}", url)
    }

    /// Apply a re-read settings file. An `ACDM_SERVER_URL` override stays in force.
    pub fn apply_plugin_config(&self, plugin: &PluginConfig) {
        if self.config.server_url.is_none() && self.backend.base_url() != plugin.server_url {
            self.change_server_address(&plugin.server_url);
        }
        self.set_update_cycle_seconds(plugin.update_cycle_seconds);
        *self
            .position_tolerance_m
            .write()
            .unwrap_or_else(|e| e.into_inner()) = plugin.position_tolerance_m;
    }

    pub fn auth_status(&self) -> AuthStatus {
        self.auth.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_token_state(&self, token: TokenState) {
        self.auth.write().unwrap_or_else(|e| e.into_inner()).token = Some(token);
    }

    pub fn set_login_url(&self, url: Option<String>) {
        self.auth.write().unwrap_or_else(|e| e.into_inner()).login_url = url;
    }

    // --- controller context ---

    pub fn active_airports(&self) -> Vec<String> {
        self.active_airports
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Replace the airports this client handles; returns the stored list.
    pub fn set_active_airports(&self, airports: Vec<String>) -> Vec<String> {
        let mut normalized: Vec<String> = Vec::with_capacity(airports.len());
        for airport in airports {
            let airport = airport.trim().to_ascii_uppercase();
            if !airport.is_empty() && !normalized.contains(&airport) {
                normalized.push(airport);
            }
        }
        tracing::info!("Active airports: {}", normalized.join(", "));
        *self
            .active_airports
            .write()
            .unwrap_or_else(|e| e.into_inner()) = normalized.clone();
        normalized
    }

    pub fn session(&self) -> SessionInfo {
        self.session.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Store the controller connection. A disconnect drops the master role.
    pub fn set_session(&self, session: SessionInfo) {
        let connected = session.connected;
        *self.session.write().unwrap_or_else(|e| e.into_inner()) = session;
        if !connected && self.master.swap(false, Ordering::SeqCst) {
            tracing::warn!("Disconnected from the network, switched to SLAVE");
        }
    }

    // --- pilots ---

    /// Queue a local flight-plan observation for the next cycle.
    ///
    /// As master, a position report that implies a milestone queues the
    /// matching update right away.
    pub fn submit_flightplan(
        &self,
        input: &FlightplanInput,
        now: DateTime<Utc>,
    ) -> Option<PilotUpdate> {
        let pilot = Pilot::from_flightplan(input, now);
        let callsign = pilot.callsign.clone();
        self.flightplan_updates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(FlightplanUpdate {
                issued_at: now,
                pilot,
            });

        if !self.is_master() {
            return None;
        }

        let mut pilots = self.pilots.lock().unwrap_or_else(|e| e.into_inner());
        let record = pilots.get_mut(&callsign)?;
        let update = detect_movement(
            &record.consolidated,
            input.latitude,
            input.longitude,
            input.groundspeed_kt,
            now,
        )?;

        let plan = ActionPlan {
            updates: vec![update],
            ground_state: None,
        };
        apply_plan(record, &plan, now);
        let snapshot = record.clone();
        self.pending_actions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(QueuedAction {
                callsign: callsign.clone(),
                plan,
                queued_at: now,
            });
        drop(pilots);

        tracing::info!("Detected {} for {}", update.name(), callsign);
        self.queue_persist(PersistOp::Upsert(snapshot));
        Some(update)
    }

    /// Run a controller action on a tracked pilot.
    pub fn perform_action(
        &self,
        callsign: &str,
        action: &ClearanceAction,
        now: DateTime<Utc>,
    ) -> Result<ActionOutcome, ActionError> {
        if !self.is_master() {
            return Err(ActionError::NotMaster);
        }
        let callsign = callsign.trim().to_ascii_uppercase();

        let mut pilots = self.pilots.lock().unwrap_or_else(|e| e.into_inner());
        let record = pilots
            .get_mut(&callsign)
            .ok_or_else(|| ActionError::UnknownPilot(callsign.clone()))?;
        let plan = plan_action(&record.consolidated, action, now)?;
        if plan.updates.is_empty() && plan.ground_state.is_none() {
            return Ok(ActionOutcome {
                plan,
                pilot: Some(record.consolidated.clone()),
            });
        }

        let (op, pilot) = match apply_plan(record, &plan, now) {
            LocalEffect::Keep => {
                let pilot = record.consolidated.clone();
                (PersistOp::Upsert(record.clone()), Some(pilot))
            }
            LocalEffect::Remove => {
                pilots.remove(&callsign);
                (PersistOp::Delete(callsign.clone()), None)
            }
        };
        self.pending_actions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(QueuedAction {
                callsign: callsign.clone(),
                plan: plan.clone(),
                queued_at: now,
            });
        drop(pilots);

        tracing::debug!("Queued {} update(s) for {}", plan.updates.len(), callsign);
        self.queue_persist(op);
        Ok(ActionOutcome { plan, pilot })
    }

    pub fn take_pending_actions(&self) -> Vec<QueuedAction> {
        std::mem::take(&mut *self.pending_actions.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn take_flightplan_updates(&self) -> Vec<FlightplanUpdate> {
        std::mem::take(
            &mut *self
                .flightplan_updates
                .lock()
                .unwrap_or_else(|e| e.into_inner()),
        )
    }

    pub fn snapshot_pilots(&self) -> PilotMap {
        self.pilots.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn pilot(&self, callsign: &str) -> Option<PilotRecord> {
        self.pilots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&callsign.trim().to_ascii_uppercase())
            .cloned()
    }

    /// Swap in the result of an update cycle.
    ///
    /// Actions queued while the cycle ran are applied to the new map first.
    /// Changed and removed records are handed to the persistence loop.
    pub fn replace_pilots(&self, mut next: PilotMap) {
        let ops = {
            let mut pilots = self.pilots.lock().unwrap_or_else(|e| e.into_inner());
            let pending = self
                .pending_actions
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            for action in pending.iter() {
                if let Some(record) = next.get_mut(&action.callsign) {
                    if apply_plan(record, &action.plan, action.queued_at) == LocalEffect::Remove {
                        next.remove(&action.callsign);
                    }
                }
            }
            drop(pending);

            let previous = std::mem::replace(&mut *pilots, next);
            diff_records(&previous, &pilots)
        };

        for op in ops {
            self.queue_persist(op);
        }
    }

    /// Load records saved by an earlier run without writing them back.
    pub fn restore_pilots(&self, records: Vec<PilotRecord>) -> usize {
        let mut pilots = self.pilots.lock().unwrap_or_else(|e| e.into_inner());
        for record in records {
            pilots.insert(record.callsign().to_string(), record);
        }
        pilots.len()
    }

    // --- persistence hand-off ---

    pub fn queue_persist(&self, op: PersistOp) {
        let Some(tx) = &self.persist_tx else {
            return;
        };
        match tx.try_send(op) {
            Ok(()) => {}
            Err(TrySendError::Full(op)) | Err(TrySendError::Closed(op)) => {
                self.persist_overflow
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(op.callsign().to_string(), op);
            }
        }
    }

    pub fn take_persist_overflow(&self) -> HashMap<String, PersistOp> {
        std::mem::take(
            &mut *self
                .persist_overflow
                .lock()
                .unwrap_or_else(|e| e.into_inner()),
        )
    }

    // --- loops and flow measures ---

    pub fn mark_loop_heartbeat(&self, name: &'static str) {
        self.loop_heartbeats.insert(name, Utc::now());
    }

    pub fn loop_heartbeats(&self) -> BTreeMap<String, DateTime<Utc>> {
        self.loop_heartbeats
            .iter()
            .map(|entry| (entry.key().to_string(), *entry.value()))
            .collect()
    }

    pub fn replace_flow_measures(&self, measures: Vec<EcfmpFlowMeasure>) {
        self.flow_measures.clear();
        for measure in measures {
            self.flow_measures.insert(measure.id, measure);
        }
    }

    /// Flow measures by id, optionally only those active at `at`.
    pub fn flow_measures(&self, active_at: Option<DateTime<Utc>>) -> Vec<EcfmpFlowMeasure> {
        let mut measures: Vec<EcfmpFlowMeasure> = self
            .flow_measures
            .iter()
            .filter(|entry| active_at.map_or(true, |at| entry.value().is_active(at)))
            .map(|entry| entry.value().clone())
            .collect();
        measures.sort_by_key(|measure| measure.id);
        measures
    }
}

fn clamp_cycle(seconds: u64) -> u64 {
    seconds.clamp(MIN_UPDATE_CYCLE_SECONDS, MAX_UPDATE_CYCLE_SECONDS)
}

/// Apply a plan to the consolidated view; ground states go to both views.
pub fn apply_plan(record: &mut PilotRecord, plan: &ActionPlan, at: DateTime<Utc>) -> LocalEffect {
    for update in &plan.updates {
        if apply_local(&mut record.consolidated, update, at) == LocalEffect::Remove {
            return LocalEffect::Remove;
        }
    }
    if let Some(ground_state) = plan.ground_state {
        record.local.ground_state = Some(ground_state);
        record.consolidated.ground_state = Some(ground_state);
    }
    LocalEffect::Keep
}

fn diff_records(previous: &PilotMap, next: &PilotMap) -> Vec<PersistOp> {
    let mut ops: Vec<PersistOp> = next
        .iter()
        .filter(|(callsign, record)| previous.get(*callsign) != Some(*record))
        .map(|(_, record)| PersistOp::Upsert(record.clone()))
        .collect();
    ops.extend(
        previous
            .keys()
            .filter(|callsign| !next.contains_key(*callsign))
            .map(|callsign| PersistOp::Delete(callsign.clone())),
    );
    ops
}
