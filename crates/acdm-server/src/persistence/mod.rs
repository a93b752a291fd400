//! Persistence layer for the tracker.
//!
//! SQLite storage for pilot records, the backend token, and forwarded log
//! messages. The in-memory pilot map stays authoritative; writes are
//! coalesced by the persistence loops.

pub mod auth_tokens;
pub mod db;
pub mod log_messages;
pub mod pilots;

pub use db::{init_database, Database};
pub use log_messages::LogRecord;
