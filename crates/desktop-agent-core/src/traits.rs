//! Credential storage and identity-provider seams.

use async_trait::async_trait;
use thiserror::Error;

use crate::Credential;

/// Token store error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Storage error: {0}")]
    Internal(String),
}

/// Persistence for the single credential. No business logic: get, set, clear.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Stored credential, if any.
    async fn get(&self) -> Result<Option<Credential>, StoreError>;

    /// Replace the stored credential.
    async fn set(&self, credential: &Credential) -> Result<(), StoreError>;

    /// Remove the stored credential. Clearing an empty store succeeds.
    async fn clear(&self) -> Result<(), StoreError>;
}

/// Identity-provider refresh error.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("No signed-in session")]
    SignedOut,
    #[error("Token provider error: {0}")]
    Provider(String),
}

/// Source of short-lived identity-provider tokens.
///
/// Sign-in itself happens elsewhere; this only mints a fresh token for an
/// existing session.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Fetch a fresh bearer token.
    async fn fetch_token(&self) -> Result<String, RefreshError>;
}
