//! Shared library surface for the tracker service and its tests.

pub mod api;
pub mod backoff;
pub mod commands;
pub mod config;
pub mod logging;
pub mod loops;
pub mod master;
pub mod persistence;
pub mod state;
