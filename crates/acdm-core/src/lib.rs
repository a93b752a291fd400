pub mod clearance;
pub mod models;
pub mod spatial;
pub mod sync;
pub mod time;
pub mod timing;

pub use clearance::{
    apply_local, detect_movement, plan_action, stage, ActionError, ActionPlan, ClearanceAction,
    DepartureStage, LocalEffect, PilotUpdate,
};
pub use models::{
    EcfmpFilter, EcfmpFlowMeasure, EcfmpMeasure, FlightplanInput, FlightplanUpdate, GroundState,
    Pilot, PilotRecord, ServerConfiguration, TobtState,
};
pub use spatial::{geodesic_distance, haversine_distance};
pub use sync::{
    coalesce_flightplan_updates, consolidate, delta_to_backend, merge_backend_pilots,
    merge_flightplan_updates, BackendMerge, ConsolidationError, FlightplanMerge, PilotMap,
    SyncDecision,
};
pub use time::{format_backend_time, parse_backend_time, TimeError};
pub use timing::{evaluate, TimingSummary};
