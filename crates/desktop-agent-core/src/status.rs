//! Connection status reported by the connection state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Connection status of the single transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// No transport and nothing scheduled.
    Disconnected,
    /// Transport is being opened or the registration handshake is in flight.
    Connecting,
    /// Registered with the service; tool traffic flows.
    Connected,
    /// Waiting out a backoff delay before the next attempt.
    Reconnecting,
    /// The credential was rejected. Terminal until a new one is installed.
    Revoked,
}

impl ConnectionStatus {
    /// Whether a `connect()` request is a no-op in this state.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected | Self::Reconnecting)
    }

    /// Whether tool traffic must be rejected in this state.
    #[must_use]
    pub const fn is_transitional(self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Revoked => "revoked",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting…"),
            Self::Connected => write!(f, "Connected"),
            Self::Reconnecting => write!(f, "Reconnecting…"),
            Self::Revoked => write!(f, "Device Revoked"),
        }
    }
}

/// Point-in-time view of the connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub status: ConnectionStatus,
    /// Identifier issued by the service on registration. Survives plain
    /// disconnects, cleared on revocation.
    pub device_id: Option<String>,
    /// Monotonic transition counter; 0 before the first transition.
    pub seq: u64,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            device_id: None,
            seq: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&ConnectionStatus::Reconnecting).unwrap();
        assert_eq!(json, "\"reconnecting\"");
        assert_eq!(ConnectionStatus::Revoked.as_str(), "revoked");
    }

    #[test]
    fn test_active_states() {
        assert!(ConnectionStatus::Connected.is_active());
        assert!(ConnectionStatus::Reconnecting.is_active());
        assert!(!ConnectionStatus::Disconnected.is_active());
        assert!(!ConnectionStatus::Revoked.is_active());
        assert!(!ConnectionStatus::Connected.is_transitional());
    }
}
