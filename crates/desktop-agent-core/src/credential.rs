//! Bearer credentials presented to the remote service.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a credential came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialMode {
    /// Long-lived token issued by the service when a pairing code is claimed.
    /// Revocable server-side, never refreshed.
    DeviceIssued,
    /// Short-lived token from the identity provider. Must be refreshed
    /// proactively before it expires.
    IdentityProviderIssued,
}

/// Opaque bearer token plus the mode it was issued under.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    token: String,
    mode: CredentialMode,
}

impl Credential {
    /// Create a credential.
    #[must_use]
    pub fn new(token: impl Into<String>, mode: CredentialMode) -> Self {
        Self {
            token: token.into(),
            mode,
        }
    }

    /// Device-issued credential.
    #[must_use]
    pub fn device(token: impl Into<String>) -> Self {
        Self::new(token, CredentialMode::DeviceIssued)
    }

    /// Identity-provider credential.
    #[must_use]
    pub fn identity_provider(token: impl Into<String>) -> Self {
        Self::new(token, CredentialMode::IdentityProviderIssued)
    }

    /// The raw bearer token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    #[must_use]
    pub const fn mode(&self) -> CredentialMode {
        self.mode
    }

    /// True when the token string is empty or whitespace.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.token.trim().is_empty()
    }
}

// Tokens end up in log lines through `{:?}` far too easily.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("mode", &self.mode)
            .finish()
    }
}
