//! Session state and snapshot types.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigField, ConnectError};

/// Server identity learned from a successful handshake.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerIdentity {
    /// Virtual IP of the server inside the overlay.
    pub server_vip: String,
    /// Control-server address the session was negotiated with.
    pub server_addr: String,
    /// Version announced by this helper.
    pub helper_version: String,
    /// Version reported by the server.
    pub server_version: String,
}

/// Session state, without payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StateKind {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Error,
}

impl StateKind {
    /// Wire name of the state.
    pub fn as_str(self) -> &'static str {
        match self {
            StateKind::Disconnected => "disconnected",
            StateKind::Connecting => "connecting",
            StateKind::Connected => "connected",
            StateKind::Disconnecting => "disconnecting",
            StateKind::Error => "error",
        }
    }
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable status snapshot.
///
/// Each variant carries exactly the fields that are meaningful in that state,
/// so a `Connected` status without an assigned VIP cannot be constructed.
/// Serializes to the helper's flat JSON shape, tagged by `state`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum Status {
    /// No session.
    #[default]
    Disconnected,
    /// Handshake in progress.
    Connecting {
        /// Address being negotiated with.
        server_addr: String,
    },
    /// Session established.
    Connected {
        /// Virtual IP assigned to this client.
        assigned_vip: String,
        #[serde(flatten)]
        server: ServerIdentity,
    },
    /// Session being torn down; identity still valid.
    Disconnecting {
        assigned_vip: String,
        #[serde(flatten)]
        server: ServerIdentity,
    },
    /// Last attempt failed or the tunnel was lost.
    Error {
        /// Failure description.
        message: String,
    },
}

impl Status {
    /// State of this snapshot.
    pub fn kind(&self) -> StateKind {
        match self {
            Status::Disconnected => StateKind::Disconnected,
            Status::Connecting { .. } => StateKind::Connecting,
            Status::Connected { .. } => StateKind::Connected,
            Status::Disconnecting { .. } => StateKind::Disconnecting,
            Status::Error { .. } => StateKind::Error,
        }
    }

    /// Assigned VIP, present only while Connected or Disconnecting.
    pub fn assigned_vip(&self) -> Option<&str> {
        match self {
            Status::Connected { assigned_vip, .. } | Status::Disconnecting { assigned_vip, .. } => {
                Some(assigned_vip)
            }
            _ => None,
        }
    }

    /// Server identity, present only while Connected or Disconnecting.
    pub fn server(&self) -> Option<&ServerIdentity> {
        match self {
            Status::Connected { server, .. } | Status::Disconnecting { server, .. } => Some(server),
            _ => None,
        }
    }

    /// Address of the control server, if one is known in this state.
    pub fn server_addr(&self) -> Option<&str> {
        match self {
            Status::Connecting { server_addr } => Some(server_addr),
            Status::Connected { server, .. } | Status::Disconnecting { server, .. } => {
                Some(&server.server_addr)
            }
            _ => None,
        }
    }

    /// Failure description of an Error status.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Status::Error { message } => Some(message),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Status::Connected { .. })
    }
}

/// Traffic statistics snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    /// Bytes read from the tunnel and sent to the server.
    pub bytes_sent: u64,
    /// Bytes received from the server.
    pub bytes_recv: u64,
    /// Seconds since the Connected transition; zero when not connected.
    pub uptime_seconds: u64,
}

/// Handshake request payload.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitialConfig {
    /// Control-server address (`host:port`).
    pub server: String,
    /// Bootstrap credential. Never logged.
    pub token: String,
}

impl InitialConfig {
    pub fn new(server: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            server: server.into().trim().to_string(),
            token: token.into(),
        }
    }

    /// Checks that both required fields are present.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::InvalidConfig`] naming the first empty field.
    pub fn validate(&self) -> Result<(), ConnectError> {
        if self.server.trim().is_empty() {
            return Err(ConnectError::InvalidConfig(ConfigField::Server));
        }
        if self.token.is_empty() {
            return Err(ConnectError::InvalidConfig(ConfigField::Token));
        }
        Ok(())
    }
}

impl fmt::Debug for InitialConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitialConfig")
            .field("server", &self.server)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Public IP and geolocation data. Advisory only.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpInfo {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub country: String,
    #[serde(default, rename = "countryCode")]
    pub country_code: String,
    #[serde(default)]
    pub isp: String,
}

impl IpInfo {
    /// True when the lookup produced nothing.
    pub fn is_empty(&self) -> bool {
        self.query.is_empty() && self.city.is_empty() && self.country.is_empty() && self.isp.is_empty()
    }

    /// "City, Country" with whichever parts are known.
    pub fn location(&self) -> Option<String> {
        match (self.city.is_empty(), self.country.is_empty()) {
            (false, false) => Some(format!("{}, {}", self.city, self.country)),
            (false, true) => Some(self.city.clone()),
            (true, false) => Some(self.country.clone()),
            (true, true) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected() -> Status {
        Status::Connected {
            assigned_vip: "10.0.0.42".to_string(),
            server: ServerIdentity {
                server_vip: "10.0.0.1".to_string(),
                server_addr: "vpn.example:443".to_string(),
                helper_version: "1.2.0".to_string(),
                server_version: "1.3.0".to_string(),
            },
        }
    }

    #[test]
    fn test_status_serializes_flat() {
        let json = serde_json::to_value(connected()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "state": "connected",
                "assigned_vip": "10.0.0.42",
                "server_vip": "10.0.0.1",
                "server_addr": "vpn.example:443",
                "helper_version": "1.2.0",
                "server_version": "1.3.0",
            })
        );

        let json = serde_json::to_value(Status::Disconnected).unwrap();
        assert_eq!(json, serde_json::json!({ "state": "disconnected" }));
    }

    #[test]
    fn test_status_parses_wire_json() {
        let status: Status = serde_json::from_str(
            r#"{"state":"connected","assigned_vip":"10.0.0.42","server_vip":"10.0.0.1",
                "server_addr":"vpn.example:443","helper_version":"1.2.0","server_version":"1.3.0"}"#,
        )
        .unwrap();
        assert_eq!(status, connected());

        let status: Status =
            serde_json::from_str(r#"{"state":"error","message":"handshake timed out"}"#).unwrap();
        assert_eq!(status.error_message(), Some("handshake timed out"));
    }

    #[test]
    fn test_assigned_vip_only_when_session_established() {
        assert_eq!(connected().assigned_vip(), Some("10.0.0.42"));
        assert_eq!(Status::Disconnected.assigned_vip(), None);
        assert_eq!(
            Status::Connecting {
                server_addr: "vpn.example:443".into()
            }
            .assigned_vip(),
            None
        );
        assert_eq!(
            Status::Error {
                message: "x".into()
            }
            .assigned_vip(),
            None
        );
    }

    #[test]
    fn test_state_kind_names() {
        assert_eq!(connected().kind().to_string(), "connected");
        assert_eq!(StateKind::Disconnecting.as_str(), "disconnecting");
    }

    #[test]
    fn test_initial_config_validation() {
        assert!(InitialConfig::new("vpn.example:443", "abc123").validate().is_ok());
        assert!(matches!(
            InitialConfig::new("  ", "abc123").validate(),
            Err(ConnectError::InvalidConfig(ConfigField::Server))
        ));
        assert!(matches!(
            InitialConfig::new("vpn.example:443", "").validate(),
            Err(ConnectError::InvalidConfig(ConfigField::Token))
        ));
    }

    #[test]
    fn test_initial_config_debug_redacts_token() {
        let debug = format!("{:?}", InitialConfig::new("vpn.example:443", "abc123"));
        assert!(debug.contains("vpn.example:443"));
        assert!(!debug.contains("abc123"));
    }

    #[test]
    fn test_ip_info_location() {
        let info = IpInfo {
            city: "Vienna".into(),
            country: "Austria".into(),
            ..IpInfo::default()
        };
        assert_eq!(info.location().as_deref(), Some("Vienna, Austria"));
        assert!(IpInfo::default().is_empty());
        assert_eq!(IpInfo::default().location(), None);
    }
}
