//! Auth coordinator: the only writer of the credential.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use desktop_agent_core::{
    AgentEvent, ConnectionStatus, Credential, CredentialMode, StoreError, TokenProvider,
    TokenStore,
};
use thiserror::Error;
use tokio::{
    sync::{Mutex, broadcast, watch},
    time::{Instant, Interval, MissedTickBehavior},
};

use crate::{config::AuthMode, connection::ConnectionHandle};

/// Auth error.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Token cannot be empty")]
    EmptyToken,
    #[error("Token contains control characters")]
    InvalidToken,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of [`AuthCoordinator::startup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// A credential is installed and a connection was requested.
    Ready,
    /// Nothing stored; pairing or sign-in is required.
    Unauthenticated,
}

/// Serialized commit point for credential writes.
#[derive(Debug, Default)]
struct Applied {
    /// Highest ticket committed so far.
    ticket: u64,
    /// The current credential was installed, not refreshed.
    explicit: bool,
}

/// Keeps the connection supplied with a valid credential.
///
/// Writes are last-write-wins keyed by an issuance ticket taken when the
/// write *started*: a refresh that began before a newer write finishes
/// cannot overwrite it. Clearing bumps an epoch so refreshes that started
/// under the old credential are discarded when they land.
pub struct AuthCoordinator {
    mode: AuthMode,
    store: Arc<dyn TokenStore>,
    provider: Option<Arc<dyn TokenProvider>>,
    connection: ConnectionHandle,
    credential: watch::Sender<Option<Credential>>,
    refresh_interval: Duration,
    issued: AtomicU64,
    epoch: AtomicU64,
    /// Automatic refresh is off until a credential is installed again.
    suspended: AtomicBool,
    commit: Mutex<Applied>,
}

impl std::fmt::Debug for AuthCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthCoordinator")
            .field("mode", &self.mode)
            .field("has_provider", &self.provider.is_some())
            .field("refresh_interval", &self.refresh_interval)
            .finish_non_exhaustive()
    }
}

impl AuthCoordinator {
    #[must_use]
    pub fn new(
        mode: AuthMode,
        store: Arc<dyn TokenStore>,
        provider: Option<Arc<dyn TokenProvider>>,
        connection: ConnectionHandle,
        credential: watch::Sender<Option<Credential>>,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            mode,
            store,
            provider,
            connection,
            credential,
            refresh_interval,
            issued: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
            suspended: AtomicBool::new(false),
            commit: Mutex::new(Applied::default()),
        }
    }

    #[must_use]
    pub const fn mode(&self) -> AuthMode {
        self.mode
    }

    /// Whether a credential is currently installed.
    #[must_use]
    pub fn has_credential(&self) -> bool {
        self.credential.borrow().is_some()
    }

    /// Load the stored credential and request a connection once.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read.
    pub async fn startup(&self) -> Result<AuthState, AuthError> {
        let stored = self.store.get().await?;

        match (stored, self.mode) {
            (Some(credential), _) => {
                let ticket = self.next_ticket();
                self.commit(credential, ticket, None, false).await?;
                tracing::info!("stored credential found, connecting");
                self.connection.connect();
                Ok(AuthState::Ready)
            }
            (None, AuthMode::Development) => {
                tracing::info!("development identity, connecting without credential");
                self.connection.connect();
                Ok(AuthState::Ready)
            }
            (None, _) => {
                self.suspended.store(true, Ordering::SeqCst);
                tracing::info!("no stored credential, pairing or sign-in required");
                Ok(AuthState::Unauthenticated)
            }
        }
    }

    /// Install a token supplied from outside (sign-in or manual entry).
    ///
    /// The token is tagged for the configured mode. Leaves `revoked` but does
    /// not connect.
    ///
    /// # Errors
    /// Returns an error if the token is blank or cannot be stored.
    pub async fn set_token(&self, token: &str) -> Result<(), AuthError> {
        let mode = match self.mode {
            AuthMode::IdentityProvider => CredentialMode::IdentityProviderIssued,
            AuthMode::Device | AuthMode::Development => CredentialMode::DeviceIssued,
        };
        self.install(Credential::new(token.trim(), mode)).await
    }

    /// Persist and publish `credential`, leaving `revoked` if needed.
    ///
    /// # Errors
    /// Returns an error if the credential is blank, cannot travel in a
    /// header, or cannot be stored.
    pub async fn install(&self, credential: Credential) -> Result<(), AuthError> {
        if credential.is_blank() {
            return Err(AuthError::EmptyToken);
        }
        if credential
            .token()
            .chars()
            .any(|c| c.is_ascii_control() && c != '\t')
        {
            return Err(AuthError::InvalidToken);
        }
        let ticket = self.next_ticket();
        self.commit(credential, ticket, None, true).await?;
        tracing::info!("credential installed");

        if self.connection.status() == ConnectionStatus::Revoked {
            self.connection.reset();
        }
        Ok(())
    }

    /// Stored token, if any.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read.
    pub async fn stored_token(&self) -> Result<Option<String>, AuthError> {
        Ok(self
            .store
            .get()
            .await?
            .map(|credential| credential.token().to_string()))
    }

    /// Sign out: forget the credential and drop the connection.
    ///
    /// # Errors
    /// Returns an error if the store cannot be cleared.
    pub async fn clear(&self) -> Result<(), AuthError> {
        self.forget().await?;
        self.connection.disconnect();
        Ok(())
    }

    /// Handle a revocation reported by the connection.
    ///
    /// Only the refused credential is forgotten. One installed after the
    /// revocation was published is kept and the connection leaves `revoked`.
    pub async fn on_revoked(&self) {
        let refused = self.connection.revoked_credential();
        let applied = self.commit.lock().await;
        let replaced = *self.credential.borrow() != refused;
        if applied.explicit && replaced {
            drop(applied);
            tracing::info!("credential replaced since revocation, keeping it");
            if self.connection.status() == ConnectionStatus::Revoked {
                self.connection.reset();
            }
            return;
        }

        tracing::warn!("credential revoked, clearing stored token");
        if let Err(e) = self.forget_locked().await {
            tracing::error!("failed to clear revoked credential: {e}");
        }
    }

    /// Fetch a fresh token from the provider and install it if still current.
    ///
    /// Failures are logged; the next tick tries again.
    pub async fn refresh(&self) {
        let Some(provider) = &self.provider else {
            return;
        };
        let epoch = self.epoch.load(Ordering::SeqCst);
        if self.suspended.load(Ordering::SeqCst) {
            tracing::debug!("refresh skipped, no active session");
            return;
        }

        let ticket = self.next_ticket();
        match provider.fetch_token().await {
            Ok(token) => {
                let credential = Credential::identity_provider(token);
                if credential.is_blank() {
                    tracing::warn!("token provider returned an empty token");
                    return;
                }
                match self.commit(credential, ticket, Some(epoch), true).await {
                    Ok(true) => tracing::debug!(ticket, "token refreshed"),
                    Ok(false) => tracing::debug!(ticket, "stale refresh result dropped"),
                    Err(e) => tracing::warn!("failed to store refreshed token: {e}"),
                }
            }
            Err(e) => tracing::warn!("token refresh failed: {e}"),
        }
    }

    /// Background loop: periodic refresh in identity-provider mode, plus
    /// reactions to refresh-needed and credential-invalid events.
    pub async fn run(self: Arc<Self>, mut events: broadcast::Receiver<AgentEvent>) {
        let mut ticker = (self.mode == AuthMode::IdentityProvider).then(|| {
            let mut ticker =
                tokio::time::interval_at(Instant::now() + self.refresh_interval, self.refresh_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            tokio::select! {
                () = tick(&mut ticker) => {
                    tracing::debug!("scheduled token refresh");
                    tokio::spawn(Arc::clone(&self).refresh_owned());
                }
                event = events.recv() => match event {
                    Ok(AgentEvent::CredentialInvalid) => self.on_revoked().await,
                    Ok(AgentEvent::RefreshNeeded) if self.mode == AuthMode::IdentityProvider => {
                        tracing::debug!("out-of-band token refresh");
                        tokio::spawn(Arc::clone(&self).refresh_owned());
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "auth coordinator lagged behind events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    }

    async fn refresh_owned(self: Arc<Self>) {
        self.refresh().await;
    }

    fn next_ticket(&self) -> u64 {
        self.issued.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Commit `credential` unless a newer write or a clear got there first.
    ///
    /// `epoch` is set for refresh results, which never revive a suspended
    /// session. Any other commit resumes it.
    async fn commit(
        &self,
        credential: Credential,
        ticket: u64,
        epoch: Option<u64>,
        persist: bool,
    ) -> Result<bool, StoreError> {
        let mut applied = self.commit.lock().await;
        if epoch.is_some_and(|epoch| {
            epoch != self.epoch.load(Ordering::SeqCst) || self.suspended.load(Ordering::SeqCst)
        }) {
            return Ok(false);
        }
        if ticket <= applied.ticket {
            return Ok(false);
        }
        if persist {
            self.store.set(&credential).await?;
        }
        applied.ticket = ticket;
        applied.explicit = epoch.is_none();
        if applied.explicit {
            self.suspended.store(false, Ordering::SeqCst);
        }
        self.credential.send_replace(Some(credential));
        Ok(true)
    }

    async fn forget(&self) -> Result<(), StoreError> {
        let _applied = self.commit.lock().await;
        self.forget_locked().await
    }

    /// Caller holds the commit lock.
    async fn forget_locked(&self) -> Result<(), StoreError> {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.suspended.store(true, Ordering::SeqCst);
        self.credential.send_replace(None);
        self.store.clear().await
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use desktop_agent_core::RefreshError;
    use tokio::sync::{Notify, mpsc::UnboundedReceiver};

    use super::*;
    use crate::{connection::Command, storage::MemoryTokenStore};

    /// Hands out `jwt-1`, `jwt-2`, ... and can be held mid-fetch.
    #[derive(Default)]
    struct Provider {
        calls: StdMutex<u32>,
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl TokenProvider for Provider {
        async fn fetch_token(&self) -> Result<String, RefreshError> {
            let n = {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                *calls
            };
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            Ok(format!("jwt-{n}"))
        }
    }

    fn coordinator(
        mode: AuthMode,
        store: Arc<MemoryTokenStore>,
        provider: Option<Arc<dyn TokenProvider>>,
    ) -> (
        AuthCoordinator,
        watch::Receiver<Option<Credential>>,
        UnboundedReceiver<Command>,
        watch::Sender<Option<Credential>>,
    ) {
        let (handle, commands, refused) = ConnectionHandle::detached();
        let (tx, rx) = watch::channel(None);
        let auth = AuthCoordinator::new(
            mode,
            store,
            provider,
            handle,
            tx,
            Duration::from_secs(40),
        );
        (auth, rx, commands, refused)
    }

    #[tokio::test]
    async fn test_startup_without_credential() {
        let store = Arc::new(MemoryTokenStore::new());
        let (auth, credential, mut commands, _refused) = coordinator(AuthMode::Device, store, None);

        assert_eq!(auth.startup().await.unwrap(), AuthState::Unauthenticated);
        assert!(credential.borrow().is_none());
        assert!(commands.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_startup_with_credential_connects_once() {
        let store = Arc::new(MemoryTokenStore::with_credential(Credential::device("dev-tok")));
        let (auth, credential, mut commands, _refused) = coordinator(AuthMode::Device, store, None);

        assert_eq!(auth.startup().await.unwrap(), AuthState::Ready);
        assert_eq!(credential.borrow().as_ref().unwrap().token(), "dev-tok");
        assert!(matches!(commands.try_recv(), Ok(Command::Connect)));
        assert!(commands.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_development_mode_connects_without_credential() {
        let store = Arc::new(MemoryTokenStore::new());
        let (auth, _credential, mut commands, _refused) =
            coordinator(AuthMode::Development, store, None);

        assert_eq!(auth.startup().await.unwrap(), AuthState::Ready);
        assert!(matches!(commands.try_recv(), Ok(Command::Connect)));
    }

    #[tokio::test]
    async fn test_blank_token_rejected() {
        let store = Arc::new(MemoryTokenStore::new());
        let (auth, _credential, _commands, _refused) =
            coordinator(AuthMode::Device, store.clone(), None);

        assert!(matches!(auth.set_token("   ").await, Err(AuthError::EmptyToken)));
        assert!(store.get().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_token_with_control_characters_rejected() {
        let store = Arc::new(MemoryTokenStore::new());
        let (auth, credential, _commands, _refused) =
            coordinator(AuthMode::Device, store.clone(), None);

        assert!(matches!(
            auth.set_token("abc\r\ndef").await,
            Err(AuthError::InvalidToken)
        ));
        assert!(credential.borrow().is_none());
        assert!(store.get().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear_forgets_and_disconnects() {
        let store = Arc::new(MemoryTokenStore::new());
        let (auth, credential, mut commands, _refused) =
            coordinator(AuthMode::Device, store.clone(), None);

        auth.set_token("abc").await.unwrap();
        assert_eq!(auth.stored_token().await.unwrap().as_deref(), Some("abc"));

        auth.clear().await.unwrap();
        assert!(credential.borrow().is_none());
        assert!(auth.stored_token().await.unwrap().is_none());
        assert!(matches!(commands.try_recv(), Ok(Command::Disconnect)));
    }

    #[tokio::test]
    async fn test_refresh_installs_provider_token() {
        let store = Arc::new(MemoryTokenStore::with_credential(Credential::identity_provider(
            "jwt-0",
        )));
        let provider: Arc<dyn TokenProvider> = Arc::new(Provider::default());
        let (auth, credential, _commands, _refused) =
            coordinator(AuthMode::IdentityProvider, store.clone(), Some(provider));

        auth.startup().await.unwrap();
        auth.refresh().await;
        assert_eq!(credential.borrow().as_ref().unwrap().token(), "jwt-1");
        assert_eq!(store.get().await.unwrap().unwrap().token(), "jwt-1");
    }

    #[tokio::test]
    async fn test_late_refresh_cannot_resurrect_cleared_session() {
        let gate = Arc::new(Notify::new());
        let store = Arc::new(MemoryTokenStore::with_credential(Credential::identity_provider(
            "jwt-0",
        )));
        let provider: Arc<dyn TokenProvider> = Arc::new(Provider {
            calls: StdMutex::new(0),
            gate: Some(gate.clone()),
        });
        let (auth, credential, _commands, _refused) =
            coordinator(AuthMode::IdentityProvider, store.clone(), Some(provider));
        let auth = Arc::new(auth);
        auth.startup().await.unwrap();

        let pending = tokio::spawn(Arc::clone(&auth).refresh_owned());
        tokio::task::yield_now().await;
        auth.clear().await.unwrap();
        gate.notify_one();
        pending.await.unwrap();

        assert!(credential.borrow().is_none());
        assert!(store.get().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_older_refresh_loses_to_newer_write() {
        let gate = Arc::new(Notify::new());
        let store = Arc::new(MemoryTokenStore::with_credential(Credential::identity_provider(
            "jwt-0",
        )));
        let provider: Arc<dyn TokenProvider> = Arc::new(Provider {
            calls: StdMutex::new(0),
            gate: Some(gate.clone()),
        });
        let (auth, credential, _commands, _refused) =
            coordinator(AuthMode::IdentityProvider, store, Some(provider));
        let auth = Arc::new(auth);
        auth.startup().await.unwrap();

        let pending = tokio::spawn(Arc::clone(&auth).refresh_owned());
        tokio::task::yield_now().await;
        auth.set_token("manual").await.unwrap();
        gate.notify_one();
        pending.await.unwrap();

        assert_eq!(credential.borrow().as_ref().unwrap().token(), "manual");
    }

    #[tokio::test]
    async fn test_revocation_event_clears_store() {
        let store = Arc::new(MemoryTokenStore::with_credential(Credential::device("dev")));
        let (auth, credential, _commands, refused) =
            coordinator(AuthMode::Device, store.clone(), None);
        let auth = Arc::new(auth);
        auth.startup().await.unwrap();
        refused.send_replace(Some(Credential::device("dev")));

        let (events_tx, events) = broadcast::channel(8);
        let task = tokio::spawn(Arc::clone(&auth).run(events));
        events_tx.send(AgentEvent::CredentialInvalid).unwrap();
        drop(events_tx);
        task.await.unwrap();

        assert!(credential.borrow().is_none());
        assert!(store.get().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_token_installed_after_revocation_survives() {
        let store = Arc::new(MemoryTokenStore::with_credential(Credential::device("old")));
        let (auth, credential, _commands, refused) =
            coordinator(AuthMode::Device, store.clone(), None);
        let auth = Arc::new(auth);
        auth.startup().await.unwrap();

        // The connection refused "old"; "fresh" lands before the event is handled.
        refused.send_replace(Some(Credential::device("old")));
        auth.set_token("fresh").await.unwrap();

        let (events_tx, events) = broadcast::channel(8);
        let task = tokio::spawn(Arc::clone(&auth).run(events));
        events_tx.send(AgentEvent::CredentialInvalid).unwrap();
        drop(events_tx);
        task.await.unwrap();

        assert_eq!(credential.borrow().as_ref().unwrap().token(), "fresh");
        assert_eq!(store.get().await.unwrap().unwrap().token(), "fresh");
    }

    #[tokio::test]
    async fn test_refreshed_token_does_not_outlive_revocation() {
        let store = Arc::new(MemoryTokenStore::with_credential(Credential::identity_provider(
            "jwt-0",
        )));
        let provider: Arc<dyn TokenProvider> = Arc::new(Provider::default());
        let (auth, credential, _commands, refused) =
            coordinator(AuthMode::IdentityProvider, store.clone(), Some(provider));
        auth.startup().await.unwrap();

        refused.send_replace(Some(Credential::identity_provider("jwt-0")));
        auth.refresh().await;
        auth.on_revoked().await;

        assert!(credential.borrow().is_none());
        assert!(store.get().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_refresh_result_dropped_once_cleared() {
        let store = Arc::new(MemoryTokenStore::with_credential(Credential::identity_provider(
            "jwt-0",
        )));
        let provider: Arc<dyn TokenProvider> = Arc::new(Provider::default());
        let (auth, credential, _commands, _refused) =
            coordinator(AuthMode::IdentityProvider, store.clone(), Some(provider));
        auth.startup().await.unwrap();
        auth.clear().await.unwrap();

        // A refresh that read the epoch after the clear bumped it.
        let epoch = auth.epoch.load(Ordering::SeqCst);
        let ticket = auth.next_ticket();
        let committed = auth
            .commit(Credential::identity_provider("jwt-late"), ticket, Some(epoch), true)
            .await
            .unwrap();

        assert!(!committed);
        assert!(credential.borrow().is_none());
        assert!(store.get().await.unwrap().is_none());
    }
}
