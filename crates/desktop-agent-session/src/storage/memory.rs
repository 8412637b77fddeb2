//! In-memory token store.

use std::sync::RwLock;

use async_trait::async_trait;
use desktop_agent_core::{Credential, StoreError, TokenStore};

/// In-memory token store.
///
/// Useful for tests and development identities.
/// The credential is lost on restart.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    credential: RwLock<Option<Credential>>,
}

impl MemoryTokenStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store already holding `credential`.
    #[must_use]
    pub fn with_credential(credential: Credential) -> Self {
        Self {
            credential: RwLock::new(Some(credential)),
        }
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get(&self) -> Result<Option<Credential>, StoreError> {
        Ok(self
            .credential
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?
            .clone())
    }

    async fn set(&self, credential: &Credential) -> Result<(), StoreError> {
        *self
            .credential
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))? = Some(credential.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.credential
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?
            .take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_clear() {
        let store = MemoryTokenStore::new();
        assert!(store.get().await.unwrap().is_none());

        store.set(&Credential::device("abc")).await.unwrap();
        assert_eq!(store.get().await.unwrap().unwrap().token(), "abc");

        store.set(&Credential::device("def")).await.unwrap();
        assert_eq!(store.get().await.unwrap().unwrap().token(), "def");

        store.clear().await.unwrap();
        store.clear().await.unwrap();
        assert!(store.get().await.unwrap().is_none());
    }
}
