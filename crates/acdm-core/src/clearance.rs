//! Departure clearance state machine.
//!
//! Controller actions expand into queued [`PilotUpdate`]s. Each update is
//! applied optimistically to the consolidated record and later forwarded to
//! the backend, which may overwrite it again on the next update cycle.

use crate::models::{GroundState, Pilot, TobtState};
use crate::spatial::geodesic_distance;
use crate::time::{parse_hhmm, TimeError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Milestone reached by a flight, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DepartureStage {
    Planned,
    TobtConfirmed,
    Sequenced,
    StartupRequested,
    StartupApproved,
    OffBlockRequested,
    OffBlock,
    Airborne,
    Inactive,
}

/// Derive the current milestone of a pilot.
pub fn stage(pilot: &Pilot) -> DepartureStage {
    if pilot.inactive {
        DepartureStage::Inactive
    } else if pilot.atot.is_some() {
        DepartureStage::Airborne
    } else if pilot.aobt.is_some() {
        DepartureStage::OffBlock
    } else if pilot.aort.is_some() {
        DepartureStage::OffBlockRequested
    } else if pilot.asat.is_some() {
        DepartureStage::StartupApproved
    } else if pilot.asrt.is_some() {
        DepartureStage::StartupRequested
    } else if pilot.tsat.is_some() {
        DepartureStage::Sequenced
    } else if pilot.tobt_state == TobtState::Confirmed {
        DepartureStage::TobtConfirmed
    } else {
        DepartureStage::Planned
    }
}

/// Update queued for a single pilot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum PilotUpdate {
    UpdateExot(i64),
    UpdateTobt(DateTime<Utc>),
    UpdateTobtConfirmed(Option<DateTime<Utc>>),
    UpdateAsat(DateTime<Utc>),
    UpdateAsrt(DateTime<Utc>),
    UpdateAobt(DateTime<Utc>),
    UpdateAort(DateTime<Utc>),
    UpdateAtot(DateTime<Utc>),
    ResetTobt,
    ResetAsat,
    ResetAsrt,
    ResetTobtConfirmed,
    ResetAort,
    ResetAobt,
    ResetPilot,
}

impl PilotUpdate {
    pub fn name(&self) -> &'static str {
        match self {
            Self::UpdateExot(_) => "EXOT",
            Self::UpdateTobt(_) => "TOBT",
            Self::UpdateTobtConfirmed(_) => "confirmed TOBT",
            Self::UpdateAsat(_) => "ASAT",
            Self::UpdateAsrt(_) => "ASRT",
            Self::UpdateAobt(_) => "AOBT",
            Self::UpdateAort(_) => "AORT",
            Self::UpdateAtot(_) => "ATOT",
            Self::ResetTobt => "TOBT reset",
            Self::ResetAsat => "ASAT reset",
            Self::ResetAsrt => "ASRT reset",
            Self::ResetTobtConfirmed => "confirmed TOBT reset",
            Self::ResetAort => "AORT reset",
            Self::ResetAobt => "AOBT reset",
            Self::ResetPilot => "pilot reset",
        }
    }
}

/// What happens to the record after an update has been applied locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalEffect {
    Keep,
    Remove,
}

/// Apply an update to a pilot without waiting for the backend.
pub fn apply_local(pilot: &mut Pilot, update: &PilotUpdate, now: DateTime<Utc>) -> LocalEffect {
    pilot.last_update = now;

    match *update {
        PilotUpdate::UpdateExot(minutes) => {
            pilot.exot = Some(minutes);
            pilot.tsat = None;
            pilot.ttot = None;
            pilot.asat = None;
            pilot.aobt = None;
            pilot.atot = None;
        }
        PilotUpdate::UpdateTobt(tobt) => set_tobt(pilot, Some(tobt), false),
        PilotUpdate::UpdateTobtConfirmed(tobt) => set_tobt(pilot, tobt, true),
        PilotUpdate::UpdateAsat(at) => pilot.asat = Some(at),
        PilotUpdate::UpdateAsrt(at) => pilot.asrt = Some(at),
        PilotUpdate::UpdateAobt(at) => pilot.aobt = Some(at),
        PilotUpdate::UpdateAort(at) => pilot.aort = Some(at),
        PilotUpdate::UpdateAtot(at) => pilot.atot = Some(at),
        PilotUpdate::ResetTobt => {
            pilot.tobt = None;
            pilot.tsat = None;
            pilot.ttot = None;
            pilot.exot = None;
            pilot.asat = None;
            pilot.asrt = None;
            pilot.aobt = None;
            pilot.aort = None;
            pilot.atot = None;
        }
        PilotUpdate::ResetAsat => pilot.asat = None,
        PilotUpdate::ResetAsrt => pilot.asrt = None,
        PilotUpdate::ResetTobtConfirmed => pilot.tobt_state = TobtState::Guess,
        PilotUpdate::ResetAort => pilot.aort = None,
        PilotUpdate::ResetAobt => pilot.aobt = None,
        PilotUpdate::ResetPilot => return LocalEffect::Remove,
    }

    LocalEffect::Keep
}

fn set_tobt(pilot: &mut Pilot, tobt: Option<DateTime<Utc>>, confirmed: bool) {
    // An unset TSAT sorts before every instant.
    let reset_tsat = match (tobt, pilot.tsat) {
        (None, _) => confirmed,
        (Some(_), None) => true,
        (Some(tobt), Some(tsat)) => tobt >= tsat,
    };

    pilot.tobt = tobt;
    if reset_tsat {
        pilot.tsat = None;
    }
    pilot.ttot = None;
    pilot.exot = None;
    pilot.asat = None;
    pilot.aobt = None;
    pilot.atot = None;
}

/// Controller function triggered on a single flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClearanceAction {
    ModifyExot { minutes: i64 },
    TobtNow,
    SetTobt { clock: String },
    TobtConfirm,
    AsatNow,
    AsatNowAndStartup,
    StartupRequest,
    OffblockRequest,
    AobtNowAndState,
    ResetTobt,
    ResetAsat,
    ResetAsrt,
    ResetTobtConfirm,
    ResetAort,
    ResetAobt,
    ResetPilot,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ActionError {
    #[error("client is not master")]
    NotMaster,
    #[error("unknown pilot {0}")]
    UnknownPilot(String),
    #[error("EXOT must not be negative, got {0}")]
    NegativeExot(i64),
    #[error(transparent)]
    InvalidClock(#[from] TimeError),
}

/// Updates and ground state produced by one controller action.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionPlan {
    pub updates: Vec<PilotUpdate>,
    pub ground_state: Option<GroundState>,
}

impl ActionPlan {
    fn single(update: PilotUpdate) -> Self {
        Self {
            updates: vec![update],
            ground_state: None,
        }
    }

    fn with_ground_state(mut self, state: GroundState) -> Self {
        self.ground_state = Some(state);
        self
    }
}

/// Expand a controller action into the updates it queues.
pub fn plan_action(
    pilot: &Pilot,
    action: &ClearanceAction,
    now: DateTime<Utc>,
) -> Result<ActionPlan, ActionError> {
    let plan = match action {
        ClearanceAction::ModifyExot { minutes } => {
            if *minutes < 0 {
                return Err(ActionError::NegativeExot(*minutes));
            }
            if pilot.exot == Some(*minutes) {
                ActionPlan::default()
            } else {
                ActionPlan::single(PilotUpdate::UpdateExot(*minutes))
            }
        }
        ClearanceAction::TobtNow => ActionPlan::single(PilotUpdate::UpdateTobt(now)),
        ClearanceAction::SetTobt { clock } => {
            let tobt = parse_hhmm(clock, now)?;
            ActionPlan::single(PilotUpdate::UpdateTobtConfirmed(Some(tobt)))
        }
        ClearanceAction::TobtConfirm => {
            ActionPlan::single(PilotUpdate::UpdateTobtConfirmed(pilot.tobt))
        }
        ClearanceAction::AsatNow => startup_approval(pilot, now),
        ClearanceAction::AsatNowAndStartup => {
            startup_approval(pilot, now).with_ground_state(GroundState::Startup)
        }
        ClearanceAction::StartupRequest => ActionPlan::single(PilotUpdate::UpdateAsrt(now)),
        ClearanceAction::OffblockRequest => ActionPlan::single(PilotUpdate::UpdateAort(now)),
        ClearanceAction::AobtNowAndState => {
            let mut updates = Vec::with_capacity(2);
            if pilot.aort.is_none() {
                updates.push(PilotUpdate::UpdateAort(now));
            }
            updates.push(PilotUpdate::UpdateAobt(now));
            let state = if pilot.taxizone_is_taxiout {
                GroundState::Taxi
            } else {
                GroundState::Push
            };
            ActionPlan {
                updates,
                ground_state: Some(state),
            }
        }
        ClearanceAction::ResetTobt => ActionPlan::single(PilotUpdate::ResetTobt),
        ClearanceAction::ResetAsat => {
            ActionPlan::single(PilotUpdate::ResetAsat).with_ground_state(GroundState::NoState)
        }
        ClearanceAction::ResetAsrt => ActionPlan::single(PilotUpdate::ResetAsrt),
        ClearanceAction::ResetTobtConfirm => ActionPlan::single(PilotUpdate::ResetTobtConfirmed),
        ClearanceAction::ResetAort => ActionPlan::single(PilotUpdate::ResetAort),
        ClearanceAction::ResetAobt => {
            ActionPlan::single(PilotUpdate::ResetAobt).with_ground_state(GroundState::NoState)
        }
        ClearanceAction::ResetPilot => ActionPlan::single(PilotUpdate::ResetPilot),
    };

    Ok(plan)
}

fn startup_approval(pilot: &Pilot, now: DateTime<Utc>) -> ActionPlan {
    let mut updates = vec![PilotUpdate::UpdateAsat(now)];
    if pilot.asrt.is_none() {
        updates.push(PilotUpdate::UpdateAsrt(now));
    }
    ActionPlan {
        updates,
        ground_state: None,
    }
}

/// Displacement from the stand that counts as off-block.
pub const OFFBLOCK_MOVEMENT_M: f64 = 5.0;
/// Ground speed above which a flight is considered airborne.
pub const TAKEOFF_GROUNDSPEED_KT: f64 = 50.0;

/// Milestone implied by a new position report.
///
/// After start-up approval a flight that moved away from its recorded
/// position is off-block; an off-block flight faster than the take-off
/// threshold is airborne.
pub fn detect_movement(
    pilot: &Pilot,
    latitude: f64,
    longitude: f64,
    groundspeed_kt: Option<f64>,
    now: DateTime<Utc>,
) -> Option<PilotUpdate> {
    pilot.asat?;

    if pilot.aobt.is_none() {
        let moved = geodesic_distance(pilot.latitude, pilot.longitude, latitude, longitude);
        return (moved >= OFFBLOCK_MOVEMENT_M).then_some(PilotUpdate::UpdateAobt(now));
    }

    if pilot.atot.is_none() && groundspeed_kt.is_some_and(|gs| gs > TAKEOFF_GROUNDSPEED_KT) {
        return Some(PilotUpdate::UpdateAtot(now));
    }
    None
}
