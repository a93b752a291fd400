//! A-CDM CLI - release tooling and operator tools.
//!
//! This crate provides the binaries:
//! - version_handler: derives the build version for CI and writes it to the job environment
//! - send_flightplan: feeds flight plans into a running acdm-server

pub mod releases;
pub mod version;

pub use releases::{GithubReleases, Release};
pub use version::{determine_dev_release, VersionError, VersionOutput};
