//! Connection lifecycle, authentication and pairing for the desktop agent.
//!
//! Provides:
//! - `DesktopAgent` - Facade the host application drives
//! - Connection state machine with reconnect backoff
//! - `AuthCoordinator` - Credential installation, refresh and revocation
//! - Token stores (memory, JSON file) and configuration loading

pub mod activity;
pub mod auth;
pub mod backoff;
pub mod config;
pub mod connection;
pub mod manager;
pub mod pairing;
pub mod storage;

pub use activity::ActivityLog;
pub use auth::{AuthCoordinator, AuthError, AuthState};
pub use backoff::Backoff;
pub use config::{AgentConfig, AuthMode, ConfigError};
pub use connection::{ConnectionHandle, ConnectionInputs, ConnectionParts, spawn_connection};
pub use manager::{AgentError, DesktopAgent, DesktopAgentBuilder};
pub use pairing::PairingClaimant;
pub use storage::{FileTokenStore, MemoryTokenStore};
