//! Pairing code format and the remote claim seam.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::{Credential, DeviceProfile};

/// Length of a pairing code.
pub const PAIRING_CODE_LEN: usize = 6;

/// Pairing error.
#[derive(Debug, Error)]
pub enum PairingError {
    /// Rejected locally; the service was never contacted.
    #[error("Code must be {PAIRING_CODE_LEN} letters or digits")]
    InvalidFormat,
    /// The service refused the code (expired, unknown or already claimed).
    #[error("Pairing failed: {0}")]
    Rejected(String),
    #[error("Pairing request failed: {0}")]
    Network(String),
    #[error("Could not store device credential: {0}")]
    Storage(String),
}

/// A validated, upper-cased pairing code.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PairingCode(String);

impl PairingCode {
    /// Validate and normalize a human-entered code.
    ///
    /// Surrounding whitespace is ignored and letters are upper-cased; the
    /// result must be exactly six ASCII letters or digits.
    ///
    /// # Errors
    /// Returns [`PairingError::InvalidFormat`] otherwise.
    pub fn parse(input: &str) -> Result<Self, PairingError> {
        let code = input.trim().to_ascii_uppercase();
        if code.len() != PAIRING_CODE_LEN || !code.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(PairingError::InvalidFormat);
        }
        Ok(Self(code))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PairingCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for PairingCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PairingCode({})", self.0)
    }
}

/// Remote side of the pairing exchange.
#[async_trait]
pub trait PairingService: Send + Sync {
    /// Exchange `code` for a device-issued credential. Single attempt.
    async fn claim(
        &self,
        code: &PairingCode,
        device: &DeviceProfile,
    ) -> Result<Credential, PairingError>;
}
