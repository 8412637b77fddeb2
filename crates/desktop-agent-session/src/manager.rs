//! The desktop agent: wires the components together and exposes the
//! boundary operations the host application calls.

use std::sync::Arc;

use desktop_agent_core::{
    ActivityEvent, AgentEvent, ConnectionStatus, Connector, DeviceNameError, DeviceProfile,
    EventHub, PairingError, PairingService, ScopeError, ScopedFolderSet, StatusSnapshot,
    StoreError, TokenProvider, TokenStore, ToolExecutor,
};
use desktop_agent_transport::{
    EndpointError, HttpPairingService, WebSocketConnector, api_base_for, environment_label,
};
use futures::stream::BoxStream;
use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
};
use url::Url;

use crate::{
    activity::ActivityLog,
    auth::{AuthCoordinator, AuthError, AuthState},
    config::{AgentConfig, AuthMode, ConfigError},
    connection::{ConnectionHandle, ConnectionInputs, ConnectionParts, spawn_connection},
    pairing::PairingClaimant,
    storage::{FileTokenStore, MemoryTokenStore},
};

/// Agent error.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Pairing(#[from] PairingError),
    #[error(transparent)]
    Scope(#[from] ScopeError),
    #[error("Invalid device name: {0}")]
    InvalidDeviceName(#[from] DeviceNameError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Endpoint(#[from] EndpointError),
    #[error("Device credential revoked; pair again")]
    Revoked,
    #[error("Not signed in; pair this device first")]
    Unauthenticated,
    #[error("Missing component: {0}")]
    MissingComponent(&'static str),
}

/// Builder for [`DesktopAgent`].
pub struct DesktopAgentBuilder {
    config: AgentConfig,
    connector: Option<Arc<dyn Connector>>,
    executor: Option<Arc<dyn ToolExecutor>>,
    store: Option<Arc<dyn TokenStore>>,
    pairing: Option<Arc<dyn PairingService>>,
    provider: Option<Arc<dyn TokenProvider>>,
    device: Option<DeviceProfile>,
}

impl DesktopAgentBuilder {
    #[must_use]
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    #[must_use]
    pub fn executor(mut self, executor: Arc<dyn ToolExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    #[must_use]
    pub fn token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn pairing_service(mut self, service: Arc<dyn PairingService>) -> Self {
        self.pairing = Some(service);
        self
    }

    /// Identity-provider token source; used in identity-provider mode.
    #[must_use]
    pub fn token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    #[must_use]
    pub fn device(mut self, device: DeviceProfile) -> Self {
        self.device = Some(device);
        self
    }

    /// Spawn the background tasks. Must run inside a tokio runtime.
    ///
    /// Without a token store the credential lives in memory only.
    ///
    /// # Errors
    /// Returns an error if a timing is zero, the connector or executor is
    /// missing, or the configured folders are invalid.
    pub fn build(self) -> Result<DesktopAgent, AgentError> {
        let config = self.config;
        config.validate()?;
        let connector = self
            .connector
            .ok_or(AgentError::MissingComponent("connector"))?;
        let executor = self
            .executor
            .ok_or(AgentError::MissingComponent("executor"))?;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryTokenStore::new()));

        let scope = ScopedFolderSet::from_paths(&config.device.scoped_folders)?;
        let mut device = self.device.unwrap_or_else(|| {
            DeviceProfile::detect().with_app_version(env!("CARGO_PKG_VERSION"))
        });
        if let Some(name) = &config.device.name {
            device.rename(name)?;
        }

        let hub = EventHub::new();
        let (credential_tx, credential_rx) = watch::channel(None);
        let (scope_tx, scope_rx) = watch::channel(scope);
        let (device_tx, device_rx) = watch::channel(device);

        let (connection, connection_task) = spawn_connection(ConnectionParts {
            config: config.connection.clone(),
            connector,
            executor,
            inputs: ConnectionInputs {
                credential: credential_rx,
                scope: scope_rx,
                device: device_rx.clone(),
            },
            hub: hub.clone(),
            allow_anonymous: config.auth.mode == AuthMode::Development,
        });

        let auth = Arc::new(AuthCoordinator::new(
            config.auth.mode,
            store,
            self.provider,
            connection.clone(),
            credential_tx,
            config.auth.refresh_interval(),
        ));
        let auth_task = tokio::spawn(Arc::clone(&auth).run(hub.subscribe()));

        let activity = ActivityLog::new();
        let activity_task = activity.spawn(hub.subscribe());

        let pairing = self
            .pairing
            .map(|service| PairingClaimant::new(service, Arc::clone(&auth), device_rx));

        Ok(DesktopAgent {
            config,
            hub,
            connection,
            auth,
            pairing,
            activity,
            scope: scope_tx,
            device: device_tx,
            tasks: vec![connection_task, auth_task, activity_task],
        })
    }
}

/// A running desktop agent.
///
/// Owns the connection actor, the auth coordinator and the activity feed.
/// Dropping the agent aborts its background tasks.
pub struct DesktopAgent {
    config: AgentConfig,
    hub: EventHub,
    connection: ConnectionHandle,
    auth: Arc<AuthCoordinator>,
    pairing: Option<PairingClaimant>,
    activity: ActivityLog,
    scope: watch::Sender<ScopedFolderSet>,
    device: watch::Sender<DeviceProfile>,
    tasks: Vec<JoinHandle<()>>,
}

impl DesktopAgent {
    #[must_use]
    pub fn builder(config: AgentConfig) -> DesktopAgentBuilder {
        DesktopAgentBuilder {
            config,
            connector: None,
            executor: None,
            store: None,
            pairing: None,
            provider: None,
            device: None,
        }
    }

    /// Agent talking to the configured endpoint over WebSocket, with the
    /// credential kept in the configured file.
    ///
    /// # Errors
    /// Returns an error if an endpoint URL is invalid.
    pub fn from_config(
        config: AgentConfig,
        executor: Arc<dyn ToolExecutor>,
        provider: Option<Arc<dyn TokenProvider>>,
    ) -> Result<Self, AgentError> {
        let connector = WebSocketConnector::new(&config.endpoint.ws_url)?
            .with_development_identity(config.auth.mode == AuthMode::Development);
        let api_base = match &config.endpoint.api_url {
            Some(url) => Url::parse(url)
                .map_err(|e| EndpointError::InvalidUrl(format!("{url}: {e}")))?,
            None => api_base_for(&config.endpoint.ws_url)?,
        };
        let pairing = HttpPairingService::new(&api_base)?;
        let store: Arc<dyn TokenStore> = match config.storage.token_path() {
            Some(path) => Arc::new(FileTokenStore::new(path)),
            None => {
                tracing::warn!("no config directory, credential will not persist");
                Arc::new(MemoryTokenStore::new())
            }
        };

        let mut builder = Self::builder(config)
            .connector(Arc::new(connector))
            .executor(executor)
            .token_store(store)
            .pairing_service(Arc::new(pairing));
        if let Some(provider) = provider {
            builder = builder.token_provider(provider);
        }
        builder.build()
    }

    /// Load the stored credential and connect if there is one.
    ///
    /// # Errors
    /// Returns an error if the token store cannot be read.
    pub async fn start(&self) -> Result<AuthState, AgentError> {
        tracing::info!(
            endpoint = %self.config.endpoint.ws_url,
            environment = self.environment_label(),
            "starting desktop agent"
        );
        Ok(self.auth.startup().await?)
    }

    /// Request a connection. No-op while connecting or connected.
    ///
    /// # Errors
    /// Returns an error if revoked or no credential is installed.
    pub fn connect(&self) -> Result<(), AgentError> {
        if self.connection.status() == ConnectionStatus::Revoked {
            return Err(AgentError::Revoked);
        }
        if self.config.auth.mode != AuthMode::Development && !self.auth.has_credential() {
            return Err(AgentError::Unauthenticated);
        }
        self.connection.connect();
        Ok(())
    }

    /// Drop the connection and cancel pending retries. Idempotent.
    pub fn disconnect(&self) {
        self.connection.disconnect();
    }

    #[must_use]
    pub fn connection_status(&self) -> StatusSnapshot {
        self.connection.snapshot()
    }

    /// Status as a watch channel, for waiting on a particular state.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<StatusSnapshot> {
        self.connection.watch()
    }

    /// Wait until every earlier connect/disconnect request was handled.
    pub async fn settle(&self) {
        self.connection.sync().await;
    }

    /// Subscribe to notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.hub.subscribe()
    }

    /// Notifications as a stream.
    #[must_use]
    pub fn events(&self) -> BoxStream<'static, AgentEvent> {
        self.hub.stream()
    }

    /// Install a token (sign-in or manual entry). Leaves `revoked`; call
    /// [`connect`](Self::connect) afterwards.
    ///
    /// # Errors
    /// Returns an error if the token is blank or cannot be stored.
    pub async fn set_auth_token(&self, token: &str) -> Result<(), AgentError> {
        Ok(self.auth.set_token(token).await?)
    }

    /// # Errors
    /// Returns an error if the token store cannot be read.
    pub async fn stored_token(&self) -> Result<Option<String>, AgentError> {
        Ok(self.auth.stored_token().await?)
    }

    /// Sign out and disconnect.
    ///
    /// # Errors
    /// Returns an error if the token store cannot be cleared.
    pub async fn clear_token(&self) -> Result<(), AgentError> {
        Ok(self.auth.clear().await?)
    }

    /// Pair this device with a one-time code, then connect.
    ///
    /// # Errors
    /// Returns an error if the code is malformed, the service refuses it, or
    /// no pairing service is configured.
    pub async fn claim_pairing_code(&self, code: &str) -> Result<(), AgentError> {
        let pairing = self
            .pairing
            .as_ref()
            .ok_or(AgentError::MissingComponent("pairing service"))?;
        Ok(pairing.claim(code).await?)
    }

    #[must_use]
    pub fn scoped_folders(&self) -> Vec<String> {
        self.scope.borrow().to_vec()
    }

    /// Replace the scoped folders.
    ///
    /// # Errors
    /// Returns an error if any path is empty or relative; nothing changes.
    pub fn set_scoped_folders<I, S>(&self, paths: I) -> Result<(), AgentError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let next = ScopedFolderSet::from_paths(paths)?;
        self.scope.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
        Ok(())
    }

    /// Add a folder. Returns `false` if it was already present.
    ///
    /// # Errors
    /// Returns an error if the path is empty or relative.
    pub fn add_scoped_folder(&self, path: &str) -> Result<bool, AgentError> {
        let mut outcome = Ok(false);
        self.scope.send_if_modified(|set| {
            outcome = set.add(path);
            matches!(outcome, Ok(true))
        });
        Ok(outcome?)
    }

    /// Remove the folder at `index` in display order.
    pub fn remove_scoped_folder(&self, index: usize) -> Option<String> {
        let mut removed = None;
        self.scope.send_if_modified(|set| {
            removed = set.remove(index);
            removed.is_some()
        });
        removed
    }

    /// Whether `path` lies inside a scoped folder. Lexical check only.
    #[must_use]
    pub fn is_path_authorized(&self, path: &str) -> bool {
        self.scope.borrow().is_authorized(path)
    }

    #[must_use]
    pub fn device_name(&self) -> String {
        self.device.borrow().name.clone()
    }

    /// Rename the device. Takes effect on the next registration.
    ///
    /// # Errors
    /// Returns an error if the name is blank.
    pub fn set_device_name(&self, name: &str) -> Result<(), AgentError> {
        let mut outcome = Ok(());
        self.device.send_if_modified(|device| {
            outcome = device.rename(name);
            outcome.is_ok()
        });
        Ok(outcome?)
    }

    /// Recent tool activity, newest first.
    #[must_use]
    pub fn activity(&self) -> Vec<ActivityEvent> {
        self.activity.snapshot()
    }

    #[must_use]
    pub fn ws_url(&self) -> &str {
        &self.config.endpoint.ws_url
    }

    #[must_use]
    pub fn environment_label(&self) -> &'static str {
        environment_label(&self.config.endpoint.ws_url)
    }

    #[must_use]
    pub const fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Disconnect and stop the background tasks.
    pub async fn shutdown(mut self) {
        self.connection.shutdown();
        let mut tasks = std::mem::take(&mut self.tasks).into_iter();
        if let Some(connection_task) = tasks.next() {
            if let Err(e) = connection_task.await {
                tracing::error!("connection task failed: {e}");
            }
        }
        for task in tasks {
            task.abort();
        }
        tracing::info!("desktop agent stopped");
    }
}

impl Drop for DesktopAgent {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use desktop_agent_core::{
        Credential, Established, HandshakeError, Registration, ToolRequest, ToolResult,
    };

    use super::*;

    struct Offline;

    #[async_trait]
    impl Connector for Offline {
        async fn open(
            &self,
            _credential: Option<&Credential>,
            _registration: &Registration,
        ) -> Result<Established, HandshakeError> {
            Err(HandshakeError::Network("offline".into()))
        }
    }

    struct NoTools;

    #[async_trait]
    impl ToolExecutor for NoTools {
        async fn execute(&self, request: &ToolRequest, _scope: &ScopedFolderSet) -> ToolResult {
            Err(desktop_agent_core::ToolError::UnknownTool(request.tool.clone()))
        }
    }

    fn agent() -> DesktopAgent {
        DesktopAgent::builder(AgentConfig::default())
            .connector(Arc::new(Offline))
            .executor(Arc::new(NoTools))
            .device(DeviceProfile::new("Studio"))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_missing_connector() {
        let err = DesktopAgent::builder(AgentConfig::default())
            .executor(Arc::new(NoTools))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, AgentError::MissingComponent("connector")));
    }

    #[tokio::test]
    async fn test_zero_heartbeat_refused() {
        let mut config = AgentConfig::default();
        config.connection.heartbeat_secs = 0;
        let err = DesktopAgent::builder(config)
            .connector(Arc::new(Offline))
            .executor(Arc::new(NoTools))
            .build()
            .err()
            .unwrap();
        assert!(matches!(
            err,
            AgentError::Config(ConfigError::Invalid {
                key: "connection.heartbeat_secs",
                ..
            })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_scoped_folder_operations() {
        let agent = agent();
        assert!(agent.add_scoped_folder("/home/me/docs").unwrap());
        assert!(!agent.add_scoped_folder("/home/me/docs/").unwrap());
        assert!(agent.add_scoped_folder("relative").is_err());
        assert!(agent.is_path_authorized("/home/me/docs/a.txt"));

        agent.set_scoped_folders(["/srv", "/opt"]).unwrap();
        assert_eq!(agent.scoped_folders(), ["/srv", "/opt"]);
        assert_eq!(agent.remove_scoped_folder(0).as_deref(), Some("/srv"));
        assert_eq!(agent.remove_scoped_folder(9), None);
        assert!(!agent.is_path_authorized("/srv/x"));
    }

    #[tokio::test]
    async fn test_device_name() {
        let agent = agent();
        assert_eq!(agent.device_name(), "Studio");
        agent.set_device_name(" Work ").unwrap();
        assert_eq!(agent.device_name(), "Work");
        assert!(matches!(
            agent.set_device_name(""),
            Err(AgentError::InvalidDeviceName(_))
        ));
        assert_eq!(agent.device_name(), "Work");
    }

    #[tokio::test]
    async fn test_connect_requires_credential() {
        let agent = agent();
        assert_eq!(agent.start().await.unwrap(), AuthState::Unauthenticated);
        assert!(matches!(agent.connect(), Err(AgentError::Unauthenticated)));
        assert!(matches!(
            agent.claim_pairing_code("ABC123").await,
            Err(AgentError::MissingComponent(_))
        ));
    }

    #[tokio::test]
    async fn test_environment_label() {
        let agent = agent();
        assert_eq!(agent.ws_url(), AgentConfig::default().endpoint.ws_url);
        assert!(["Local Dev", "Production"].contains(&agent.environment_label()));
    }
}
