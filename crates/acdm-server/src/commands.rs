//! `.vacdm` control commands.

use serde::Serialize;
use thiserror::Error;

use crate::config::{parse_update_rate, PluginConfig};
use crate::state::AppState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Master,
    Slave,
    Reload,
    LogLevel { sender: String, level: String },
    /// `None` toggles the log sink
    Log(Option<bool>),
    UpdateRate(u64),
    Url(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command")]
    NotHandled,
    #[error("{0}")]
    Usage(&'static str),
    #[error("{0}")]
    InvalidValue(String),
}

const USAGE_UPDATERATE: &str = "Usage: .vacdm UPDATERATE value";
const USAGE_LOGLEVEL: &str = "Usage: .vacdm LOGLEVEL sender loglevel";
const USAGE_LOG: &str = "Usage: .vacdm LOG [ON|OFF]";
const USAGE_URL: &str = "Usage: .vacdm URL address";

/// Parse a command line. Keywords are case-insensitive; the URL argument
/// keeps its case.
pub fn parse_command(line: &str) -> Result<ControlCommand, CommandError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some(prefix) = tokens.first() else {
        return Err(CommandError::NotHandled);
    };
    if !prefix.eq_ignore_ascii_case(".vacdm") {
        return Err(CommandError::NotHandled);
    }
    let Some(keyword) = tokens.get(1).map(|keyword| keyword.to_ascii_uppercase()) else {
        return Err(CommandError::NotHandled);
    };

    match keyword.as_str() {
        "MASTER" => Ok(ControlCommand::Master),
        "SLAVE" => Ok(ControlCommand::Slave),
        "RELOAD" => Ok(ControlCommand::Reload),
        "LOGLEVEL" => match tokens.as_slice() {
            [_, _, sender, level] => Ok(ControlCommand::LogLevel {
                sender: sender.to_string(),
                level: level.to_string(),
            }),
            _ => Err(CommandError::Usage(USAGE_LOGLEVEL)),
        },
        "LOG" => match tokens.get(2).map(|arg| arg.to_ascii_uppercase()).as_deref() {
            None => Ok(ControlCommand::Log(None)),
            Some("ON") if tokens.len() == 3 => Ok(ControlCommand::Log(Some(true))),
            Some("OFF") if tokens.len() == 3 => Ok(ControlCommand::Log(Some(false))),
            Some(_) => Err(CommandError::Usage(USAGE_LOG)),
        },
        "UPDATERATE" => {
            if tokens.len() != 3 {
                return Err(CommandError::Usage(USAGE_UPDATERATE));
            }
            parse_update_rate(tokens[2])
                .map(ControlCommand::UpdateRate)
                .map_err(CommandError::InvalidValue)
        }
        "URL" => {
            if tokens.len() != 3 {
                return Err(CommandError::Usage(USAGE_URL));
            }
            let url = tokens[2];
            let lower = url.to_ascii_lowercase();
            if !lower.starts_with("http://") && !lower.starts_with("https://") {
                return Err(CommandError::InvalidValue(
                    "URL must start with http:// or https://".to_string(),
                ));
            }
            Ok(ControlCommand::Url(url.to_string()))
        }
        _ => Err(CommandError::NotHandled),
    }
}

/// Reply shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandReply {
    pub handled: bool,
    pub success: bool,
    pub message: String,
}

impl CommandReply {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            handled: true,
            success: true,
            message: message.into(),
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            handled: true,
            success: false,
            message: message.into(),
        }
    }
}

pub fn execute_line(state: &AppState, line: &str) -> CommandReply {
    match parse_command(line) {
        Ok(command) => execute(state, command),
        Err(CommandError::NotHandled) => CommandReply {
            handled: false,
            success: false,
            message: CommandError::NotHandled.to_string(),
        },
        Err(err) => CommandReply::failed(err.to_string()),
    }
}

pub fn execute(state: &AppState, command: ControlCommand) -> CommandReply {
    match command {
        ControlCommand::Master => match state.request_master() {
            Ok(()) => CommandReply::ok("Switched to MASTER"),
            Err(refusal) => {
                tracing::warn!("Cannot upgrade to Master: {}", refusal);
                CommandReply::failed(format!("Cannot upgrade to Master. {}", refusal))
            }
        },
        ControlCommand::Slave => {
            state.release_master();
            CommandReply::ok("Switched to SLAVE")
        }
        ControlCommand::Reload => match PluginConfig::load(&state.config().config_file) {
            Ok(plugin) => {
                state.apply_plugin_config(&plugin);
                CommandReply::ok("Reloaded the configuration")
            }
            Err(err) => {
                tracing::error!("Failed to reload {}: {}", state.config().config_file, err);
                CommandReply::failed(format!("Unable to reload the configuration: {}", err))
            }
        },
        ControlCommand::LogLevel { sender, level } => {
            match state.log_control().set_level(&sender, &level) {
                Ok(message) => CommandReply::ok(message),
                Err(err) => CommandReply::failed(err.to_string()),
            }
        }
        ControlCommand::Log(enabled) => {
            let control = state.log_control();
            let enabled = enabled.unwrap_or(!control.sink_enabled());
            control.set_sink_enabled(enabled);
            CommandReply::ok(if enabled {
                "Logging enabled"
            } else {
                "Logging disabled"
            })
        }
        ControlCommand::UpdateRate(seconds) => {
            state.set_update_cycle_seconds(seconds);
            CommandReply::ok(format!("Changed update rate to {} seconds", seconds))
        }
        ControlCommand::Url(url) => CommandReply::ok(state.change_server_address(&url)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::logging::LogControl;
    use crate::master::SessionInfo;
    use std::sync::Arc;

    fn state_with(config: Config) -> AppState {
        AppState::new(
            config,
            &PluginConfig::default(),
            Arc::new(LogControl::detached()),
        )
    }

    #[test]
    fn parses_keywords_case_insensitively() {
        assert_eq!(parse_command(".vacdm master"), Ok(ControlCommand::Master));
        assert_eq!(parse_command(".VACDM Slave"), Ok(ControlCommand::Slave));
        assert_eq!(parse_command(".vAcdm reload"), Ok(ControlCommand::Reload));
        assert_eq!(
            parse_command(".vacdm loglevel datamanager debug"),
            Ok(ControlCommand::LogLevel {
                sender: "datamanager".to_string(),
                level: "debug".to_string(),
            })
        );
        assert_eq!(parse_command(".vacdm log"), Ok(ControlCommand::Log(None)));
        assert_eq!(parse_command(".vacdm LOG off"), Ok(ControlCommand::Log(Some(false))));
        assert_eq!(parse_command(".vacdm updaterate 3"), Ok(ControlCommand::UpdateRate(3)));
        assert_eq!(
            parse_command(".vacdm url https://Vacdm.Example.org"),
            Ok(ControlCommand::Url("https://Vacdm.Example.org".to_string()))
        );
    }

    #[test]
    fn rejects_foreign_and_malformed_commands() {
        assert_eq!(parse_command(".other master"), Err(CommandError::NotHandled));
        assert_eq!(parse_command(".vacdm"), Err(CommandError::NotHandled));
        assert_eq!(parse_command(".vacdm dance"), Err(CommandError::NotHandled));
        assert_eq!(parse_command(""), Err(CommandError::NotHandled));

        assert_eq!(
            parse_command(".vacdm UPDATERATE"),
            Err(CommandError::Usage(USAGE_UPDATERATE))
        );
        assert_eq!(
            parse_command(".vacdm UPDATERATE 11"),
            Err(CommandError::InvalidValue(
                "Value must be number between 1 and 10".to_string()
            ))
        );
        assert_eq!(
            parse_command(".vacdm LOGLEVEL server"),
            Err(CommandError::Usage(USAGE_LOGLEVEL))
        );
        assert_eq!(parse_command(".vacdm LOG maybe"), Err(CommandError::Usage(USAGE_LOG)));
        assert_eq!(parse_command(".vacdm URL"), Err(CommandError::Usage(USAGE_URL)));
        assert!(matches!(
            parse_command(".vacdm URL ftp://host"),
            Err(CommandError::InvalidValue(_))
        ));
    }

    #[test]
    fn master_command_reports_refusal() {
        let state = state_with(Config::from_env());
        let reply = execute_line(&state, ".vacdm MASTER");
        assert!(reply.handled);
        assert!(!reply.success);
        assert_eq!(
            reply.message,
            "Cannot upgrade to Master. You are not logged in to the VATSIM network"
        );

        state.set_session(SessionInfo {
            connected: true,
            callsign: "EDDM_DEL".to_string(),
            facility: 2,
            sweatbox: false,
        });
        assert_eq!(execute_line(&state, ".vacdm MASTER").message, "Switched to MASTER");
        assert!(state.is_master());
        assert_eq!(execute_line(&state, ".vacdm SLAVE").message, "Switched to SLAVE");
        assert!(!state.is_master());
    }

    #[test]
    fn log_commands_drive_log_control() {
        let state = state_with(Config::from_env());
        assert_eq!(execute_line(&state, ".vacdm LOG").message, "Logging enabled");
        assert!(state.log_control().sink_enabled());
        assert_eq!(execute_line(&state, ".vacdm LOG OFF").message, "Logging disabled");

        let reply = execute_line(&state, ".vacdm LOGLEVEL server warning");
        assert!(reply.success);
        assert_eq!(reply.message, "Changed sender server to WARNING");

        let reply = execute_line(&state, ".vacdm LOGLEVEL server loud");
        assert!(!reply.success);
        assert_eq!(reply.message, "Invalid log level: LOUD");
    }

    #[test]
    fn reload_applies_settings_file() {
        let path = std::env::temp_dir().join(format!("vacdm-{}.txt", uuid::Uuid::new_v4()));
        std::fs::write(&path, "UPDATE_RATE_SECONDS=2\nPOSITION_TOLERANCE_M=4\n").unwrap();
        let mut config = Config::from_env();
        config.config_file = path.to_string_lossy().to_string();
        let state = state_with(config);

        let reply = execute_line(&state, ".vacdm RELOAD");
        assert!(reply.success, "{}", reply.message);
        assert_eq!(state.update_cycle_seconds(), 2);
        assert_eq!(state.position_tolerance_m(), 4.0);

        std::fs::write(&path, "UPDATE_RATE_SECONDS=fast\n").unwrap();
        let reply = execute_line(&state, ".vacdm reload");
        assert!(!reply.success);
        assert!(reply.message.contains("line 1"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn url_and_update_rate_commands() {
        let state = state_with(Config::from_env());
        let reply = execute_line(&state, ".vacdm URL http://localhost:3000");
        assert_eq!(reply.message, "Changed vACDM URL: http://localhost:3000");
        assert_eq!(state.backend().base_url(), "http://localhost:3000");

        execute_line(&state, ".vacdm UPDATERATE 9");
        assert_eq!(state.update_cycle_seconds(), 9);

        let reply = execute_line(&state, "hello");
        assert!(!reply.handled);
    }
}
