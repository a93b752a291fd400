//! Server configuration from environment and the plugin settings file.

use acdm_backend::{DEFAULT_ECFMP_URL, DEFAULT_SERVER_URL};
use std::env;
use std::path::Path;
use thiserror::Error;

pub const MIN_UPDATE_CYCLE_SECONDS: u64 = 1;
pub const MAX_UPDATE_CYCLE_SECONDS: u64 = 10;
pub const DEFAULT_UPDATE_CYCLE_SECONDS: u64 = 5;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_path: String,
    pub database_max_connections: u32,
    pub config_file: String,
    /// Overrides `SERVER_url` from the config file
    pub server_url: Option<String>,
    pub ecfmp_url: String,
    pub plugin_major: i64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            server_port: env::var("ACDM_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3080),
            database_path: env::var("ACDM_DATABASE_PATH")
                .unwrap_or_else(|_| "data/acdm.db".to_string()),
            database_max_connections: env::var("ACDM_DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
            config_file: env::var("ACDM_CONFIG_FILE").unwrap_or_else(|_| "vacdm.txt".to_string()),
            server_url: env::var("ACDM_SERVER_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            ecfmp_url: env::var("ACDM_ECFMP_URL")
                .unwrap_or_else(|_| DEFAULT_ECFMP_URL.to_string()),
            plugin_major: env::var("ACDM_PLUGIN_MAJOR")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(package_major),
        }
    }
}

fn package_major() -> i64 {
    env!("CARGO_PKG_VERSION")
        .split('.')
        .next()
        .and_then(|major| major.parse().ok())
        .unwrap_or(0)
}

/// Parse failure in the settings file, with the offending line.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct ConfigError {
    pub line: usize,
    pub message: String,
}

impl ConfigError {
    fn at(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// Settings read from `vacdm.txt`.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginConfig {
    pub server_url: String,
    pub update_cycle_seconds: u64,
    /// Geodesic displacement that counts as a position change
    pub position_tolerance_m: f64,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            update_cycle_seconds: DEFAULT_UPDATE_CYCLE_SECONDS,
            position_tolerance_m: 0.0,
        }
    }
}

impl PluginConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|_| ConfigError::at(0, "Unable to open the configuration file"))?;
        Self::parse(&text)
    }

    /// Parse `KEY=value` lines. Empty lines and `#` comments are skipped.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        for (index, raw) in text.lines().enumerate() {
            let line = index + 1;
            let entry = raw.trim();
            if entry.is_empty() || entry.starts_with('#') {
                continue;
            }

            let parts: Vec<&str> = entry.split('=').collect();
            if parts.len() != 2 {
                return Err(ConfigError::at(line, "Invalid configuration entry"));
            }
            let key = parts[0].trim();
            let value = parts[1].trim();
            if value.is_empty() {
                return Err(ConfigError::at(line, "Invalid entry"));
            }

            match key {
                "SERVER_url" => config.server_url = value.to_string(),
                "UPDATE_RATE_SECONDS" => {
                    config.update_cycle_seconds = parse_update_rate(value)
                        .map_err(|message| ConfigError::at(line, message))?;
                }
                "POSITION_TOLERANCE_M" => {
                    config.position_tolerance_m = value
                        .parse::<f64>()
                        .ok()
                        .filter(|tolerance| tolerance.is_finite() && *tolerance >= 0.0)
                        .ok_or_else(|| {
                            ConfigError::at(line, "Value must be a non-negative number")
                        })?;
                }
                key if key.starts_with("COLOR_") => {
                    // colours only matter to a radar display
                    if value.split(',').count() != 3 {
                        return Err(ConfigError::at(line, "Invalid color config"));
                    }
                }
                _ => return Err(ConfigError::at(line, "Unknown file entry")),
            }
        }

        Ok(config)
    }
}

/// Validate an update cycle length in seconds.
pub fn parse_update_rate(value: &str) -> Result<u64, String> {
    value
        .trim()
        .parse::<u64>()
        .ok()
        .filter(|seconds| (MIN_UPDATE_CYCLE_SECONDS..=MAX_UPDATE_CYCLE_SECONDS).contains(seconds))
        .ok_or_else(|| {
            format!(
                "Value must be number between {} and {}",
                MIN_UPDATE_CYCLE_SECONDS, MAX_UPDATE_CYCLE_SECONDS
            )
        })
}
