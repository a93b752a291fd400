//! vACDM backend and ECFMP API clients.

pub mod client;
pub mod ecfmp;
pub mod wire;

pub use client::{AuthStart, BackendClient, TokenState, DEFAULT_SERVER_URL};
pub use ecfmp::{EcfmpClient, DEFAULT_ECFMP_URL};
pub use wire::{ApiCheck, BackendWrite, DpiMessage};
