//! JSON shapes exchanged with the vACDM backend.
//!
//! Everything here is pure: the client in [`crate::client`] only moves these
//! values over HTTP.

use acdm_core::models::{EcfmpMeasure, Pilot, ServerConfiguration, TobtState};
use acdm_core::time::{format_backend_time, parse_backend_time};
use acdm_core::PilotUpdate;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

pub const CONFIG_PATH: &str = "/api/v1/config/plugin";
pub const PILOTS_PATH: &str = "/api/v1/pilots";
pub const MESSAGES_PATH: &str = "/api/v1/messages";
pub const PROFILE_PATH: &str = "/api/auth/profile";
pub const TOKEN_START_PATH: &str = "/api/plugin-token/start";

pub fn pilot_path(callsign: &str) -> String {
    format!("{}/{}", PILOTS_PATH, callsign)
}

/// Result of comparing the backend version with the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCheck {
    Valid(ServerConfiguration),
    Empty,
    MissingMajor,
    /// Backend major version differs from the client's
    Incompatible { required: i64 },
}

impl ApiCheck {
    pub fn evaluate(response: &Value, plugin_major: i64) -> Self {
        let is_empty = match response {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            _ => false,
        };
        if is_empty {
            return Self::Empty;
        }

        let major = response
            .pointer("/version/major")
            .and_then(Value::as_i64)
            .unwrap_or(-1);
        if major == -1 {
            return Self::MissingMajor;
        }
        if major != plugin_major {
            return Self::Incompatible { required: major };
        }

        Self::Valid(server_configuration(response))
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }

    /// Operator-facing explanation of a failed check.
    pub fn message(&self) -> String {
        match self {
            Self::Valid(config) => format!("Connected to {}", config.name),
            Self::Empty => "Invalid backend-version response".to_string(),
            Self::MissingMajor => "Could not find required major version".to_string(),
            Self::Incompatible { required } => format!(
                "Backend-version is incompatible. Please update the plugin. Required version: {}.X.X",
                required
            ),
        }
    }
}

fn server_configuration(response: &Value) -> ServerConfiguration {
    let int = |pointer: &str| response.pointer(pointer).and_then(Value::as_i64).unwrap_or(0);
    let flag = |pointer: &str| {
        response
            .pointer(pointer)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    };

    ServerConfiguration {
        name: string_at(response, "/config/serverName"),
        allow_master_in_sweatbox: flag("/config/allowSimSession"),
        allow_master_as_observer: flag("/config/allowObsMaster"),
        version_full: string_at(response, "/version/version"),
        version_major: int("/version/major"),
        version_minor: int("/version/minor"),
        version_patch: int("/version/patch"),
        supported_airports: response
            .get("supportedAirports")
            .and_then(Value::as_array)
            .map(|airports| {
                airports
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
    }
}

fn string_at(value: &Value, pointer: &str) -> String {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn time_at(value: &Value, pointer: &str) -> Option<DateTime<Utc>> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .and_then(parse_backend_time)
}

fn float_at(value: &Value, pointer: &str) -> f64 {
    value.pointer(pointer).and_then(Value::as_f64).unwrap_or(0.0)
}

fn bool_at(value: &Value, pointer: &str) -> bool {
    value
        .pointer(pointer)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Parse the pilot list returned by `GET /api/v1/pilots`.
pub fn parse_pilots(response: &Value, now: DateTime<Utc>) -> Result<Vec<Pilot>> {
    let pilots = response
        .get("pilots")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("Backend response does not contain pilots"))?;

    Ok(pilots
        .iter()
        .filter_map(|entry| parse_pilot(entry, now))
        .collect())
}

/// Parse one backend pilot. Entries without a callsign are skipped.
pub fn parse_pilot(entry: &Value, now: DateTime<Utc>) -> Option<Pilot> {
    let callsign = entry.get("callsign").and_then(Value::as_str)?;
    if callsign.is_empty() {
        return None;
    }

    let mut pilot = Pilot::new(callsign, time_at(entry, "/updatedAt").unwrap_or(now));
    pilot.inactive = bool_at(entry, "/inactive");

    pilot.latitude = float_at(entry, "/position/lat");
    pilot.longitude = float_at(entry, "/position/lon");
    pilot.taxizone_is_taxiout = bool_at(entry, "/vacdm/taxizoneIsTaxiout");

    pilot.origin = string_at(entry, "/flightplan/adep");
    pilot.destination = string_at(entry, "/flightplan/ades");
    pilot.runway = string_at(entry, "/clearance/dep_rwy");
    pilot.sid = string_at(entry, "/clearance/sid");

    pilot.eobt = time_at(entry, "/vacdm/eobt");
    pilot.tobt = time_at(entry, "/vacdm/tobt");
    pilot.tobt_state = TobtState::from_backend(&string_at(entry, "/vacdm/tobt_state"));
    pilot.ctot = time_at(entry, "/vacdm/ctot");
    pilot.ttot = time_at(entry, "/vacdm/ttot");
    pilot.tsat = time_at(entry, "/vacdm/tsat");
    pilot.exot = entry.pointer("/vacdm/exot").and_then(Value::as_i64);
    pilot.asat = time_at(entry, "/vacdm/asat");
    pilot.aobt = time_at(entry, "/vacdm/aobt");
    pilot.atot = time_at(entry, "/vacdm/atot");
    pilot.asrt = time_at(entry, "/vacdm/asrt");
    pilot.aort = time_at(entry, "/vacdm/aort");

    pilot.measures = entry
        .get("measures")
        .and_then(Value::as_array)
        .map(|measures| {
            measures
                .iter()
                .map(|measure| EcfmpMeasure {
                    ident: string_at(measure, "/ident"),
                    value: measure.get("value").and_then(Value::as_i64).unwrap_or(-1),
                    mandatory_route: Vec::new(),
                })
                .collect()
        })
        .unwrap_or_default();
    pilot.has_booking = bool_at(entry, "/hasBooking");

    Some(pilot)
}

/// Body of `POST /api/v1/pilots` for a flight the backend does not know yet.
pub fn initial_pilot_body(pilot: &Pilot) -> Value {
    json!({
        "callsign": pilot.callsign,
        "inactive": false,
        "position": {
            "lat": pilot.latitude,
            "lon": pilot.longitude,
        },
        "flightplan": {
            "adep": pilot.origin,
            "ades": pilot.destination,
        },
        "vacdm": {
            "eobt": format_backend_time(pilot.eobt),
            "tobt": format_backend_time(pilot.tobt),
        },
        "clearance": {
            "dep_rwy": pilot.runway,
            "sid": pilot.sid,
        },
    })
}

/// Patch body for a new TOBT.
///
/// An automatic TOBT is sent as confirmed. The TSAT is withdrawn when the
/// TOBT reaches it, or when a manual TOBT is cleared.
pub fn tobt_update_body(pilot: &Pilot, tobt: Option<DateTime<Utc>>, manual: bool) -> Value {
    // unset sorts before every instant
    let reset_tsat = match (tobt, pilot.tsat) {
        (None, Some(_)) => manual,
        (None, None) | (Some(_), None) => true,
        (Some(tobt), Some(tsat)) => tobt >= tsat,
    };

    let mut vacdm = Map::new();
    vacdm.insert("tobt".to_string(), json!(format_backend_time(tobt)));
    if reset_tsat {
        vacdm.insert("tsat".to_string(), json!(format_backend_time(None)));
    }
    if !manual {
        vacdm.insert(
            "tobt_state".to_string(),
            json!(TobtState::Confirmed.as_str()),
        );
    }
    for key in ["ttot", "asat", "aobt", "atot"] {
        vacdm.insert(key.to_string(), json!(format_backend_time(None)));
    }

    json!({
        "callsign": pilot.callsign,
        "vacdm": Value::Object(vacdm),
    })
}

/// Patch body that rewinds a flight to the given TOBT and state.
pub fn tobt_reset_body(callsign: &str, tobt: Option<DateTime<Utc>>, state: TobtState) -> Value {
    let unset = format_backend_time(None);
    json!({
        "callsign": callsign,
        "vacdm": {
            "tobt": format_backend_time(tobt),
            "tobt_state": state.as_str(),
            "tsat": unset,
            "ttot": unset,
            "asat": unset,
            "asrt": unset,
            "aobt": unset,
            "atot": unset,
        },
    })
}

/// Departure planning information message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DpiMessage {
    /// Taxi-out time in minutes
    Exot(i64),
    Asat(Option<DateTime<Utc>>),
    Aobt(Option<DateTime<Utc>>),
    StartupRequest(Option<DateTime<Utc>>),
    OffblockRequest(Option<DateTime<Utc>>),
}

impl DpiMessage {
    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::Exot(_) => "x-dpi-t",
            Self::Asat(_) => "t-dpi-s",
            Self::Aobt(_) => "a-dpi",
            Self::StartupRequest(_) | Self::OffblockRequest(_) => "x-dpi-r",
        }
    }

    pub fn path(&self) -> String {
        format!("{}/{}", MESSAGES_PATH, self.endpoint())
    }

    pub fn body(&self, callsign: &str) -> Value {
        match *self {
            Self::Exot(minutes) => json!({
                "callsign": callsign,
                "message_type": "X-DPI-taxi",
                "exot": minutes,
            }),
            Self::Asat(asat) => json!({
                "callsign": callsign,
                "message_type": "T-DPI-s",
                "asat": format_backend_time(asat),
            }),
            Self::Aobt(aobt) => json!({
                "callsign": callsign,
                "message_type": "A-DPI",
                "aobt": format_backend_time(aobt),
            }),
            Self::StartupRequest(asrt) => json!({
                "callsign": callsign,
                "message_type": "X-DPI-req",
                "asrt": format_backend_time(asrt),
            }),
            Self::OffblockRequest(aort) => json!({
                "callsign": callsign,
                "message_type": "X-DPI-req",
                "aort": format_backend_time(aort),
            }),
        }
    }
}

/// HTTP write that forwards one queued update.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendWrite {
    Patch { path: String, body: Value },
    Message { message: DpiMessage, body: Value },
    Delete { path: String },
}

impl BackendWrite {
    fn message(callsign: &str, message: DpiMessage) -> Self {
        Self::Message {
            body: message.body(callsign),
            message,
        }
    }

    fn patch(callsign: &str, body: Value) -> Self {
        Self::Patch {
            path: pilot_path(callsign),
            body,
        }
    }
}

/// Translate a queued update into the backend write it causes.
///
/// `pilot` is the consolidated record at send time.
pub fn backend_write(pilot: &Pilot, update: &PilotUpdate) -> BackendWrite {
    let callsign = pilot.callsign.as_str();
    match *update {
        PilotUpdate::UpdateExot(minutes) => BackendWrite::message(callsign, DpiMessage::Exot(minutes)),
        PilotUpdate::UpdateTobt(tobt) => {
            BackendWrite::patch(callsign, tobt_update_body(pilot, Some(tobt), false))
        }
        PilotUpdate::UpdateTobtConfirmed(tobt) => {
            BackendWrite::patch(callsign, tobt_update_body(pilot, tobt, true))
        }
        PilotUpdate::UpdateAsat(at) => BackendWrite::message(callsign, DpiMessage::Asat(Some(at))),
        PilotUpdate::ResetAsat => BackendWrite::message(callsign, DpiMessage::Asat(None)),
        PilotUpdate::UpdateAsrt(at) => {
            BackendWrite::message(callsign, DpiMessage::StartupRequest(Some(at)))
        }
        PilotUpdate::ResetAsrt => BackendWrite::message(callsign, DpiMessage::StartupRequest(None)),
        PilotUpdate::UpdateAort(at) => {
            BackendWrite::message(callsign, DpiMessage::OffblockRequest(Some(at)))
        }
        PilotUpdate::ResetAort => BackendWrite::message(callsign, DpiMessage::OffblockRequest(None)),
        PilotUpdate::UpdateAobt(at) => BackendWrite::message(callsign, DpiMessage::Aobt(Some(at))),
        PilotUpdate::ResetAobt => BackendWrite::message(callsign, DpiMessage::Aobt(None)),
        PilotUpdate::UpdateAtot(at) => BackendWrite::patch(
            callsign,
            json!({
                "callsign": callsign,
                "vacdm": { "atot": format_backend_time(Some(at)) },
            }),
        ),
        PilotUpdate::ResetTobt => {
            BackendWrite::patch(callsign, tobt_reset_body(callsign, None, pilot.tobt_state))
        }
        PilotUpdate::ResetTobtConfirmed => BackendWrite::patch(
            callsign,
            tobt_reset_body(callsign, pilot.tobt, TobtState::Guess),
        ),
        PilotUpdate::ResetPilot => BackendWrite::Delete {
            path: pilot_path(callsign),
        },
    }
}
