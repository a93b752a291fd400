//! Background loops for continuous processing.

pub mod auth_loop;
pub mod flow_measure_loop;
pub mod log_persist_loop;
pub mod persist_loop;
pub mod sync_loop;
