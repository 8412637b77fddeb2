//! Transport seam between the connection state machine and the wire.

use async_trait::async_trait;
use thiserror::Error;

use crate::{Credential, DeviceProfile, ToolRequest, ToolResult};

/// Close code: the device credential was revoked.
pub const CLOSE_REVOKED: u16 = 4010;
/// Close code: the session expired and a fresh credential is needed.
pub const CLOSE_SESSION_EXPIRED: u16 = 4011;

/// What the agent announces when registering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub device: DeviceProfile,
    pub scoped_folders: Vec<String>,
}

/// Why opening the transport failed.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// The credential was refused. Terminal for that credential.
    #[error("Credential rejected: {0}")]
    Rejected(String),
    /// The service asked for a fresh credential.
    #[error("Session expired")]
    SessionExpired,
    #[error("No credential available")]
    MissingCredential,
    #[error("Handshake timed out")]
    Timeout,
    #[error("Network error: {0}")]
    Network(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl HandshakeError {
    /// Whether retrying with the same credential can succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        !matches!(self, Self::Rejected(_) | Self::MissingCredential)
    }
}

/// Transport error on an established link.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection closed")]
    Closed,
    #[error("Network error: {0}")]
    Network(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// How an established link ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Server closed with [`CLOSE_REVOKED`].
    Revoked,
    /// Server closed with [`CLOSE_SESSION_EXPIRED`].
    SessionExpired,
    /// Any other close, with the code if one was sent.
    Normal(Option<u16>),
    /// Read error or stream end.
    Error(String),
}

impl CloseReason {
    /// Classify a close frame code.
    #[must_use]
    pub const fn from_code(code: Option<u16>) -> Self {
        match code {
            Some(CLOSE_REVOKED) => Self::Revoked,
            Some(CLOSE_SESSION_EXPIRED) => Self::SessionExpired,
            other => Self::Normal(other),
        }
    }
}

/// Frame received on a live link.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Request(ToolRequest),
    Closed(CloseReason),
}

/// Frame sent on a live link.
#[derive(Debug, Clone)]
pub enum Outbound {
    Heartbeat,
    Response {
        request_id: String,
        result: ToolResult,
    },
    UpdateFolders(Vec<String>),
}

/// An established, registered connection.
#[async_trait]
pub trait Link: Send {
    /// Send one frame.
    async fn send(&mut self, frame: Outbound) -> Result<(), TransportError>;

    /// Next inbound frame. Must be cancel-safe: it is raced against
    /// timers and commands. Keeps returning `Closed` once the link is gone.
    async fn recv(&mut self) -> Inbound;

    /// Close politely. Errors are ignored.
    async fn close(&mut self);
}

/// Result of a successful handshake.
pub struct Established {
    /// Identifier issued by the service.
    pub device_id: String,
    pub link: Box<dyn Link>,
}

impl std::fmt::Debug for Established {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Established")
            .field("device_id", &self.device_id)
            .finish_non_exhaustive()
    }
}

/// Opens the transport and performs the registration handshake.
#[async_trait]
pub trait Connector: Send + Sync {
    /// `credential` is `None` only in development mode.
    async fn open(
        &self,
        credential: Option<&Credential>,
        registration: &Registration,
    ) -> Result<Established, HandshakeError>;
}
