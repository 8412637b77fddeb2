//! Core types for the desktop agent session lifecycle.
//!
//! This crate provides the shared vocabulary:
//! - `ConnectionStatus` / `StatusSnapshot` - connection state
//! - `EventHub` - ordered broadcast of outbound notifications
//! - `ActivityFeed` - bounded recent tool activity
//! - `ScopedFolderSet` - authorized-directory allow-list
//! - Collaborator traits: token store, token provider, pairing, transport, tool executor

pub mod activity;
pub mod credential;
pub mod device;
pub mod events;
pub mod pairing;
pub mod scope;
pub mod status;
pub mod tool;
pub mod traits;
pub mod transport;

pub use activity::{ACTIVITY_CAPACITY, ActivityEvent, ActivityFeed, ActivityStatus};
pub use credential::{Credential, CredentialMode};
pub use device::{DeviceNameError, DeviceProfile};
pub use events::{AgentEvent, EventHub};
pub use pairing::{PairingCode, PairingError, PairingService};
pub use scope::{ScopeError, ScopedFolderSet};
pub use status::{ConnectionStatus, StatusSnapshot};
pub use tool::{ToolError, ToolExecutor, ToolOutput, ToolRequest, ToolResult};
pub use traits::{RefreshError, StoreError, TokenProvider, TokenStore};
pub use transport::{
    CloseReason, Connector, Established, HandshakeError, Inbound, Link, Outbound, Registration,
    TransportError,
};
