//! Master role eligibility.

use acdm_core::models::ServerConfiguration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Controller connection as reported by the radar client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    #[serde(default)]
    pub connected: bool,
    #[serde(default)]
    pub callsign: String,
    /// Network facility code; 0 is an observer
    #[serde(default)]
    pub facility: i64,
    #[serde(default)]
    pub sweatbox: bool,
}

impl SessionInfo {
    pub fn is_observer(&self) -> bool {
        self.callsign.to_ascii_uppercase().ends_with("_OBS") || self.facility == 0
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum MasterRefusal {
    #[error("You are not logged in to the VATSIM network")]
    NotConnected,
    #[error("You are logged in as Observer and Observers are not allowed to be master on this server")]
    Observer,
    #[error("You are logged in on a Sweatbox Server and Sweatbox sessions are not allowed to be master on this server")]
    Sweatbox,
}

/// Check whether this session may take the master role.
pub fn check_master_eligibility(
    session: &SessionInfo,
    server: &ServerConfiguration,
) -> Result<(), MasterRefusal> {
    if !session.connected {
        return Err(MasterRefusal::NotConnected);
    }
    if session.is_observer() && !server.allow_master_as_observer {
        return Err(MasterRefusal::Observer);
    }
    if session.sweatbox && !server.allow_master_in_sweatbox {
        return Err(MasterRefusal::Sweatbox);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tower() -> SessionInfo {
        SessionInfo {
            connected: true,
            callsign: "EDDF_TWR".to_string(),
            facility: 4,
            sweatbox: false,
        }
    }

    #[test]
    fn connected_controller_is_eligible() {
        assert_eq!(
            check_master_eligibility(&tower(), &ServerConfiguration::default()),
            Ok(())
        );
    }

    #[test]
    fn refusals_follow_precedence() {
        let server = ServerConfiguration::default();
        let offline = SessionInfo {
            connected: false,
            facility: 0,
            sweatbox: true,
            ..tower()
        };
        assert_eq!(
            check_master_eligibility(&offline, &server),
            Err(MasterRefusal::NotConnected)
        );

        let observer = SessionInfo {
            callsign: "eddf_obs".to_string(),
            sweatbox: true,
            ..tower()
        };
        assert_eq!(
            check_master_eligibility(&observer, &server),
            Err(MasterRefusal::Observer)
        );

        let sweatbox = SessionInfo {
            sweatbox: true,
            ..tower()
        };
        assert_eq!(
            check_master_eligibility(&sweatbox, &server),
            Err(MasterRefusal::Sweatbox)
        );
    }

    #[test]
    fn server_flags_lift_restrictions() {
        let server = ServerConfiguration {
            allow_master_as_observer: true,
            allow_master_in_sweatbox: true,
            ..Default::default()
        };
        let session = SessionInfo {
            facility: 0,
            sweatbox: true,
            ..tower()
        };
        assert_eq!(check_master_eligibility(&session, &server), Ok(()));
    }
}
