//! Core data models for the A-CDM tracker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of the target off-block time as reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TobtState {
    /// Derived by the backend, not yet confirmed by anyone
    #[default]
    Guess,
    /// Taken from the filed flight plan
    Flightplan,
    /// Confirmed by the pilot or a controller
    Confirmed,
    /// Set to "now" by the pilot
    Now,
    #[serde(other)]
    Unknown,
}

impl TobtState {
    /// Parse the backend representation. Unknown or empty values map to `Unknown`.
    pub fn from_backend(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "GUESS" => Self::Guess,
            "FLIGHTPLAN" => Self::Flightplan,
            "CONFIRMED" => Self::Confirmed,
            "NOW" => Self::Now,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Guess => "GUESS",
            Self::Flightplan => "FLIGHTPLAN",
            Self::Confirmed => "CONFIRMED",
            Self::Now => "NOW",
            Self::Unknown => "",
        }
    }
}

/// Ground state set by the controller when a milestone is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroundState {
    #[serde(rename = "NSTS")]
    NoState,
    #[serde(rename = "ST-UP")]
    Startup,
    #[serde(rename = "PUSH")]
    Push,
    #[serde(rename = "TAXI")]
    Taxi,
}

impl GroundState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoState => "NSTS",
            Self::Startup => "ST-UP",
            Self::Push => "PUSH",
            Self::Taxi => "TAXI",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "NSTS" => Some(Self::NoState),
            "ST-UP" => Some(Self::Startup),
            "PUSH" => Some(Self::Push),
            "TAXI" => Some(Self::Taxi),
            _ => None,
        }
    }
}

/// ECFMP measure applied to a single flight.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcfmpMeasure {
    pub ident: String,
    #[serde(default = "default_measure_value")]
    pub value: i64,
    #[serde(default)]
    pub mandatory_route: Vec<String>,
}

fn default_measure_value() -> i64 {
    -1
}

/// Filter that scopes an ECFMP flow measure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcfmpFilter {
    #[serde(rename = "type")]
    pub filter_type: String,
    #[serde(default)]
    pub value: Vec<String>,
    #[serde(default)]
    pub flightlevels: Vec<i64>,
    #[serde(default)]
    pub waypoints: Vec<String>,
}

/// Flow measure published by ECFMP.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EcfmpFlowMeasure {
    pub id: i64,
    pub ident: String,
    pub event_id: Option<i64>,
    pub reason: String,
    pub starttime: Option<DateTime<Utc>>,
    pub endtime: Option<DateTime<Utc>>,
    pub withdrawn_at: Option<DateTime<Utc>>,
    pub notified_firs: Vec<i64>,
    pub measures: Vec<EcfmpMeasure>,
    pub filters: Vec<EcfmpFilter>,
}

impl EcfmpFlowMeasure {
    /// A measure is active between start and end unless it has been withdrawn.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        if self.withdrawn_at.is_some_and(|withdrawn| withdrawn <= now) {
            return false;
        }
        let started = self.starttime.map_or(true, |start| start <= now);
        let not_ended = self.endtime.map_or(true, |end| now < end);
        started && not_ended
    }
}

/// One A-CDM record for a departing flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pilot {
    pub callsign: String,
    pub last_update: DateTime<Utc>,
    #[serde(default)]
    pub inactive: bool,

    // position data
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub taxizone_is_taxiout: bool,

    // flight plan & clearance data
    pub origin: String,
    pub destination: String,
    pub runway: String,
    pub sid: String,

    // A-CDM procedure data
    pub eobt: Option<DateTime<Utc>>,
    pub tobt: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tobt_state: TobtState,
    pub ctot: Option<DateTime<Utc>>,
    pub ttot: Option<DateTime<Utc>>,
    pub tsat: Option<DateTime<Utc>>,
    /// Estimated taxi-out time in minutes
    pub exot: Option<i64>,
    pub asat: Option<DateTime<Utc>>,
    pub aobt: Option<DateTime<Utc>>,
    pub atot: Option<DateTime<Utc>>,
    pub asrt: Option<DateTime<Utc>>,
    pub aort: Option<DateTime<Utc>>,

    #[serde(default)]
    pub measures: Vec<EcfmpMeasure>,
    #[serde(default)]
    pub has_booking: bool,
    #[serde(default)]
    pub ground_state: Option<GroundState>,
}

impl Pilot {
    /// Create an empty record for a callsign.
    pub fn new(callsign: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            callsign: callsign.into(),
            last_update: now,
            inactive: false,
            latitude: 0.0,
            longitude: 0.0,
            taxizone_is_taxiout: false,
            origin: String::new(),
            destination: String::new(),
            runway: String::new(),
            sid: String::new(),
            eobt: None,
            tobt: None,
            tobt_state: TobtState::Guess,
            ctot: None,
            ttot: None,
            tsat: None,
            exot: None,
            asat: None,
            aobt: None,
            atot: None,
            asrt: None,
            aort: None,
            measures: Vec::new(),
            has_booking: false,
            ground_state: None,
        }
    }

    /// Build a record from a local flight-plan observation.
    ///
    /// The TOBT starts out equal to the EOBT, as a flight plan carries no better estimate.
    pub fn from_flightplan(plan: &FlightplanInput, now: DateTime<Utc>) -> Self {
        let eobt = plan
            .eobt
            .as_deref()
            .map(|raw| crate::time::departure_time_from_hhmm(raw, now));
        Self {
            latitude: plan.latitude,
            longitude: plan.longitude,
            origin: plan.origin.trim().to_ascii_uppercase(),
            destination: plan.destination.trim().to_ascii_uppercase(),
            runway: plan.runway.clone().unwrap_or_default(),
            sid: plan.sid.clone().unwrap_or_default(),
            eobt,
            tobt: eobt,
            ..Self::new(plan.callsign.trim().to_ascii_uppercase(), now)
        }
    }
}

/// Local flight-plan data as submitted by the controller client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlightplanInput {
    pub callsign: String,
    pub origin: String,
    #[serde(default)]
    pub destination: String,
    #[serde(default)]
    pub runway: Option<String>,
    #[serde(default)]
    pub sid: Option<String>,
    /// Estimated departure time as HHMM
    #[serde(default)]
    pub eobt: Option<String>,
    /// Current position; a plan without one is rejected
    pub latitude: f64,
    pub longitude: f64,
    /// Ground speed in knots, used to detect the take-off roll
    #[serde(default)]
    pub groundspeed_kt: Option<f64>,
}

/// Local flight-plan observation, queued until the next update cycle.
#[derive(Debug, Clone)]
pub struct FlightplanUpdate {
    pub issued_at: DateTime<Utc>,
    pub pilot: Pilot,
}

/// Layered view of one flight: consolidated, local and backend data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PilotRecord {
    pub consolidated: Pilot,
    pub local: Pilot,
    /// `None` until the backend has reported this flight
    pub server: Option<Pilot>,
}

impl PilotRecord {
    pub fn from_local(pilot: Pilot) -> Self {
        Self {
            consolidated: pilot.clone(),
            local: pilot,
            server: None,
        }
    }

    pub fn callsign(&self) -> &str {
        &self.local.callsign
    }
}

/// Backend configuration returned by the plugin config endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfiguration {
    pub name: String,
    pub allow_master_in_sweatbox: bool,
    pub allow_master_as_observer: bool,
    pub version_full: String,
    pub version_major: i64,
    pub version_minor: i64,
    pub version_patch: i64,
    pub supported_airports: Vec<String>,
}
