//! Connection state machine.
//!
//! A single actor task owns the transport and the [`ConnectionStatus`]. Other
//! components talk to it through a [`ConnectionHandle`]: commands go in over an
//! mpsc channel, status comes out through a watch channel and the
//! [`EventHub`]. Because only the actor writes the status, transitions can
//! never interleave and every subscriber sees them in order.

use std::{collections::HashSet, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use desktop_agent_core::{
    ActivityStatus, CloseReason, ConnectionStatus, Connector, Credential, DeviceProfile, EventHub,
    HandshakeError, Inbound, Link, Outbound, Registration, ScopedFolderSet, StatusSnapshot,
    ToolError, ToolExecutor, ToolRequest, ToolResult, tool::activity_status,
};
use futures::FutureExt;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::{JoinHandle, JoinSet},
    time::{Instant, MissedTickBehavior},
};

use crate::{backoff::Backoff, config::ConnectionConfig};

#[derive(Debug)]
pub(crate) enum Command {
    Connect,
    Disconnect,
    /// Leave `revoked` after a new credential was installed.
    Reset,
    Shutdown,
    /// Acknowledged once every earlier command has been handled.
    Barrier(oneshot::Sender<()>),
}

/// Where the actor goes next.
#[derive(Debug)]
enum Phase {
    /// Disconnected or revoked; waiting for commands.
    Idle,
    /// Open the transport and register.
    Attempt,
    /// Back off, then attempt again.
    Wait(Duration),
    Stopped,
}

/// Values the actor reads when it connects.
#[derive(Debug, Clone)]
pub struct ConnectionInputs {
    pub credential: watch::Receiver<Option<Credential>>,
    pub scope: watch::Receiver<ScopedFolderSet>,
    pub device: watch::Receiver<DeviceProfile>,
}

/// Collaborators of the connection actor.
pub struct ConnectionParts {
    pub config: ConnectionConfig,
    pub connector: Arc<dyn Connector>,
    pub executor: Arc<dyn ToolExecutor>,
    pub inputs: ConnectionInputs,
    pub hub: EventHub,
    /// Connect without a credential (development identity).
    pub allow_anonymous: bool,
}

/// Cloneable handle to the connection actor.
///
/// Commands are fire-and-forget and handled in the order they were sent.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<StatusSnapshot>,
    revoked: watch::Receiver<Option<Credential>>,
}

impl ConnectionHandle {
    /// Request a connection. Ignored while already active or revoked.
    pub fn connect(&self) {
        self.send(Command::Connect);
    }

    /// Drop the connection and cancel any pending retry. Idempotent.
    pub fn disconnect(&self) {
        self.send(Command::Disconnect);
    }

    /// Move from `revoked` back to `disconnected`.
    pub fn reset(&self) {
        self.send(Command::Reset);
    }

    /// Stop the actor.
    pub fn shutdown(&self) {
        self.send(Command::Shutdown);
    }

    /// Wait until the actor has handled every command sent before this call.
    pub async fn sync(&self) {
        let (ack, done) = oneshot::channel();
        if self.commands.send(Command::Barrier(ack)).is_ok() {
            let _ = done.await;
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> StatusSnapshot {
        self.status.borrow().clone()
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().status
    }

    /// Watch the status snapshot.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<StatusSnapshot> {
        self.status.clone()
    }

    /// Credential presented on the link the service most recently revoked.
    #[must_use]
    pub fn revoked_credential(&self) -> Option<Credential> {
        self.revoked.borrow().clone()
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::debug!("connection actor stopped; command dropped");
        }
    }

    #[cfg(test)]
    pub(crate) fn detached() -> (
        Self,
        mpsc::UnboundedReceiver<Command>,
        watch::Sender<Option<Credential>>,
    ) {
        let (commands, rx) = mpsc::unbounded_channel();
        let (_status_tx, status) = watch::channel(StatusSnapshot::default());
        let (revoked_tx, revoked) = watch::channel(None);
        (
            Self {
                commands,
                status,
                revoked,
            },
            rx,
            revoked_tx,
        )
    }
}

/// Spawn the connection actor on the current runtime.
#[must_use]
pub fn spawn_connection(parts: ConnectionParts) -> (ConnectionHandle, JoinHandle<()>) {
    let (commands_tx, commands) = mpsc::unbounded_channel();
    let (status, status_rx) = watch::channel(StatusSnapshot::default());
    let (revoked, revoked_rx) = watch::channel(None);
    let backoff = Backoff::new(parts.config.backoff_base(), parts.config.backoff_max());

    let actor = ConnectionActor {
        config: parts.config,
        connector: parts.connector,
        executor: parts.executor,
        inputs: parts.inputs,
        hub: parts.hub,
        allow_anonymous: parts.allow_anonymous,
        backoff,
        status,
        commands,
        presented: None,
        revoked,
    };
    let task = tokio::spawn(actor.run());

    (
        ConnectionHandle {
            commands: commands_tx,
            status: status_rx,
            revoked: revoked_rx,
        },
        task,
    )
}

struct ConnectionActor {
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    executor: Arc<dyn ToolExecutor>,
    inputs: ConnectionInputs,
    hub: EventHub,
    allow_anonymous: bool,
    backoff: Backoff,
    status: watch::Sender<StatusSnapshot>,
    commands: mpsc::UnboundedReceiver<Command>,
    /// Credential used by the current or last attempt.
    presented: Option<Credential>,
    revoked: watch::Sender<Option<Credential>>,
}

type Completion = (String, ToolResult);

impl ConnectionActor {
    async fn run(mut self) {
        let mut phase = Phase::Idle;
        loop {
            phase = match phase {
                Phase::Idle => self.idle().await,
                Phase::Attempt => self.attempt().await,
                Phase::Wait(delay) => self.wait(delay).await,
                Phase::Stopped => break,
            };
        }
        tracing::debug!("connection actor stopped");
    }

    fn current(&self) -> ConnectionStatus {
        self.status.borrow().status
    }

    async fn idle(&mut self) -> Phase {
        loop {
            let Some(command) = self.commands.recv().await else {
                return Phase::Stopped;
            };
            match command {
                Command::Connect => {
                    if self.current() == ConnectionStatus::Revoked {
                        tracing::warn!("connect ignored: credential revoked, re-pair to continue");
                        continue;
                    }
                    if !self.allow_anonymous && self.inputs.credential.borrow().is_none() {
                        tracing::info!("connect ignored: no credential");
                        continue;
                    }
                    return Phase::Attempt;
                }
                Command::Disconnect => {
                    if self.current() != ConnectionStatus::Revoked {
                        self.transition(ConnectionStatus::Disconnected, None);
                    }
                }
                Command::Reset => {
                    if self.current() == ConnectionStatus::Revoked {
                        tracing::info!("leaving revoked state");
                        self.transition(ConnectionStatus::Disconnected, None);
                    }
                }
                Command::Shutdown => return Phase::Stopped,
                Command::Barrier(ack) => {
                    let _ = ack.send(());
                }
            }
        }
    }

    /// Commands received while connecting, backing off or connected.
    /// Returns the next phase when the command ends the current one.
    fn on_active_command(&mut self, command: Option<Command>) -> Option<Phase> {
        match command {
            Some(Command::Connect | Command::Reset) => None,
            Some(Command::Barrier(ack)) => {
                let _ = ack.send(());
                None
            }
            Some(Command::Disconnect) => {
                self.transition(ConnectionStatus::Disconnected, None);
                Some(Phase::Idle)
            }
            Some(Command::Shutdown) | None => {
                self.transition(ConnectionStatus::Disconnected, None);
                Some(Phase::Stopped)
            }
        }
    }

    async fn attempt(&mut self) -> Phase {
        self.transition(ConnectionStatus::Connecting, None);

        let credential = self.inputs.credential.borrow().clone();
        if credential.is_none() && !self.allow_anonymous {
            tracing::info!("credential cleared before connecting");
            self.transition(ConnectionStatus::Disconnected, None);
            return Phase::Idle;
        }
        self.presented.clone_from(&credential);
        let registration = Registration {
            device: self.inputs.device.borrow().clone(),
            scoped_folders: self.inputs.scope.borrow().to_vec(),
        };

        let connector = Arc::clone(&self.connector);
        let limit = self.config.handshake_timeout();
        let open = async move {
            tokio::time::timeout(limit, connector.open(credential.as_ref(), &registration))
                .await
                .unwrap_or(Err(HandshakeError::Timeout))
        };
        tokio::pin!(open);

        let outcome = loop {
            tokio::select! {
                outcome = &mut open => break outcome,
                command = self.commands.recv() => {
                    if let Some(next) = self.on_active_command(command) {
                        tracing::debug!("connection attempt cancelled");
                        return next;
                    }
                }
            }
        };

        match outcome {
            Ok(established) => {
                tracing::info!(device_id = %established.device_id, "connected");
                self.backoff.reset();
                self.transition(ConnectionStatus::Connected, Some(established.device_id));
                self.live(established.link).await
            }
            Err(HandshakeError::Rejected(reason)) => {
                tracing::warn!(%reason, "credential rejected by server");
                self.revoke();
                Phase::Idle
            }
            Err(HandshakeError::MissingCredential) => {
                tracing::info!("no credential for handshake");
                self.transition(ConnectionStatus::Disconnected, None);
                Phase::Idle
            }
            Err(HandshakeError::SessionExpired) => self.session_expired(),
            Err(e) => {
                tracing::warn!("connection failed: {e}");
                self.retry()
            }
        }
    }

    async fn wait(&mut self, delay: Duration) -> Phase {
        self.transition(ConnectionStatus::Reconnecting, None);
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                () = &mut sleep => return Phase::Attempt,
                command = self.commands.recv() => {
                    if let Some(next) = self.on_active_command(command) {
                        tracing::debug!("pending reconnect cancelled");
                        return next;
                    }
                }
            }
        }
    }

    /// Serve a registered link until it ends or a command stops it.
    async fn live(&mut self, mut link: Box<dyn Link>) -> Phase {
        let period = self.config.heartbeat();
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Completion>();
        let mut tasks = JoinSet::new();
        let mut in_flight = HashSet::new();

        let mut scope = self.inputs.scope.clone();
        scope.mark_unchanged();
        let mut scope_open = true;

        let next = loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    if let Err(e) = link.send(Outbound::Heartbeat).await {
                        tracing::warn!("heartbeat failed: {e}");
                        break self.retry();
                    }
                }
                inbound = link.recv() => match inbound {
                    Inbound::Request(request) => {
                        self.dispatch(request, &done_tx, &mut tasks, &mut in_flight);
                    }
                    Inbound::Closed(reason) => break self.on_closed(reason),
                },
                Some((request_id, result)) = done_rx.recv() => {
                    in_flight.remove(&request_id);
                    self.hub.push_tool_completed(&request_id, activity_status(&result));
                    if let Err(e) = link.send(Outbound::Response { request_id, result }).await {
                        tracing::warn!("failed to send tool response: {e}");
                        break self.retry();
                    }
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!("tool task failed: {e}");
                    }
                }
                changed = scope.changed(), if scope_open => {
                    if changed.is_err() {
                        scope_open = false;
                        continue;
                    }
                    let folders = scope.borrow_and_update().to_vec();
                    tracing::debug!(count = folders.len(), "pushing scoped folders");
                    if let Err(e) = link.send(Outbound::UpdateFolders(folders)).await {
                        tracing::warn!("failed to push scoped folders: {e}");
                        break self.retry();
                    }
                }
                command = self.commands.recv() => {
                    if let Some(next) = self.on_active_command(command) {
                        link.close().await;
                        break next;
                    }
                }
            }
        };

        for request_id in in_flight {
            tracing::debug!(%request_id, "tool request abandoned with the connection");
            self.hub
                .push_tool_completed(&request_id, ActivityStatus::Error);
        }
        next
    }

    fn dispatch(
        &self,
        request: ToolRequest,
        done: &mpsc::UnboundedSender<Completion>,
        tasks: &mut JoinSet<()>,
        in_flight: &mut HashSet<String>,
    ) {
        if !in_flight.insert(request.request_id.clone()) {
            tracing::warn!(request_id = %request.request_id, "duplicate request id in flight, ignoring");
            return;
        }
        tracing::info!(request_id = %request.request_id, tool = %request.tool, "tool request");
        self.hub
            .push_tool_started(&request.request_id, &request.tool, &request.params);

        let executor = Arc::clone(&self.executor);
        let scope = self.inputs.scope.borrow().clone();
        let limit = self.config.tool_timeout();
        let done = done.clone();

        tasks.spawn(async move {
            let call = AssertUnwindSafe(executor.execute(&request, &scope)).catch_unwind();
            let result = match tokio::time::timeout(limit, call).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => {
                    tracing::error!(request_id = %request.request_id, "tool panicked");
                    Err(ToolError::Failed("tool panicked".to_string()))
                }
                Err(_) => {
                    tracing::warn!(request_id = %request.request_id, tool = %request.tool, "tool timed out");
                    Err(ToolError::TimedOut(limit))
                }
            };
            let _ = done.send((request.request_id, result));
        });
    }

    fn on_closed(&mut self, reason: CloseReason) -> Phase {
        match reason {
            CloseReason::Revoked => {
                tracing::warn!("server revoked this device");
                self.revoke();
                Phase::Idle
            }
            CloseReason::SessionExpired => self.session_expired(),
            CloseReason::Normal(code) => {
                tracing::info!(?code, "connection closed by server");
                self.backoff.reset();
                self.retry()
            }
            CloseReason::Error(e) => {
                tracing::warn!("connection lost: {e}");
                self.retry()
            }
        }
    }

    /// Schedule the next attempt with backoff.
    fn retry(&mut self) -> Phase {
        let delay = self.backoff.next_delay();
        tracing::info!(?delay, attempt = self.backoff.attempt(), "reconnect scheduled");
        self.hub.push_refresh_needed();
        Phase::Wait(delay)
    }

    /// The service wants a fresh credential: refresh, short pause, no backoff.
    fn session_expired(&mut self) -> Phase {
        tracing::info!("session expired, refreshing credential before reconnecting");
        self.backoff.reset();
        self.hub.push_refresh_needed();
        Phase::Wait(self.config.session_expired_delay())
    }

    fn revoke(&mut self) {
        self.backoff.reset();
        self.revoked.send_replace(self.presented.take());
        self.transition(ConnectionStatus::Revoked, None);
        self.hub.push_credential_invalid();
    }

    /// Publish a transition. Repeating the current state is a no-op.
    ///
    /// `device_id` is recorded on `Connected`; revocation clears it and every
    /// other state keeps the last one.
    fn transition(&self, status: ConnectionStatus, device_id: Option<String>) {
        let changed = self.status.send_if_modified(|snapshot| {
            let device_id = match status {
                ConnectionStatus::Connected => device_id,
                ConnectionStatus::Revoked => None,
                _ => snapshot.device_id.clone(),
            };
            if snapshot.status == status && snapshot.device_id == device_id {
                return false;
            }
            snapshot.status = status;
            snapshot.device_id = device_id;
            snapshot.seq += 1;
            true
        });

        if changed {
            let snapshot = self.status.borrow().clone();
            tracing::debug!(status = snapshot.status.as_str(), seq = snapshot.seq, "status changed");
            self.hub.push_status(&snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use desktop_agent_core::{AgentEvent, Established, ToolOutput};
    use tokio::sync::broadcast;

    use super::*;

    /// Fails every attempt with a network error.
    struct Unreachable {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl Connector for Unreachable {
        async fn open(
            &self,
            _credential: Option<&Credential>,
            _registration: &Registration,
        ) -> Result<Established, HandshakeError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(HandshakeError::Network("connection refused".into()))
        }
    }

    /// Never finishes the handshake.
    struct Hanging;

    #[async_trait]
    impl Connector for Hanging {
        async fn open(
            &self,
            _credential: Option<&Credential>,
            _registration: &Registration,
        ) -> Result<Established, HandshakeError> {
            std::future::pending().await
        }
    }

    struct Echo;

    #[async_trait]
    impl ToolExecutor for Echo {
        async fn execute(&self, request: &ToolRequest, _scope: &ScopedFolderSet) -> ToolResult {
            Ok(ToolOutput::json(request.params.clone()))
        }
    }

    fn start(connector: Arc<dyn Connector>) -> (ConnectionHandle, EventHub) {
        let hub = EventHub::new();
        let (_credential_tx, credential) = watch::channel(Some(Credential::device("tok")));
        let (_scope_tx, scope) = watch::channel(ScopedFolderSet::new());
        let (_device_tx, device) = watch::channel(DeviceProfile::new("test"));
        // Senders dropped: receivers keep the last value.
        let (handle, _task) = spawn_connection(ConnectionParts {
            config: ConnectionConfig::default(),
            connector,
            executor: Arc::new(Echo),
            inputs: ConnectionInputs {
                credential,
                scope,
                device,
            },
            hub: hub.clone(),
            allow_anonymous: false,
        });
        (handle, hub)
    }

    async fn next_status(rx: &mut broadcast::Receiver<AgentEvent>) -> ConnectionStatus {
        loop {
            if let AgentEvent::StatusChanged { status, .. } = rx.recv().await.unwrap() {
                return status;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_with_growing_delay() {
        let connector = Arc::new(Unreachable {
            attempts: AtomicUsize::new(0),
        });
        let (handle, hub) = start(connector.clone());
        let mut rx = hub.subscribe();

        let started = Instant::now();
        handle.connect();
        for _ in 0..3 {
            assert_eq!(next_status(&mut rx).await, ConnectionStatus::Connecting);
            assert_eq!(next_status(&mut rx).await, ConnectionStatus::Reconnecting);
        }
        assert_eq!(next_status(&mut rx).await, ConnectionStatus::Connecting);

        // Three backoff waits of nominally 1s, 2s and 4s, each jittered ±20%.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(5600), "{elapsed:?}");
        assert!(elapsed <= Duration::from_millis(8400), "{elapsed:?}");
        assert!(connector.attempts.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_backoff() {
        let connector = Arc::new(Unreachable {
            attempts: AtomicUsize::new(0),
        });
        let (handle, hub) = start(connector.clone());
        let mut rx = hub.subscribe();

        handle.connect();
        assert_eq!(next_status(&mut rx).await, ConnectionStatus::Connecting);
        assert_eq!(next_status(&mut rx).await, ConnectionStatus::Reconnecting);

        handle.disconnect();
        assert_eq!(next_status(&mut rx).await, ConnectionStatus::Disconnected);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(handle.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_timeout_is_transient() {
        let (handle, hub) = start(Arc::new(Hanging));
        let mut rx = hub.subscribe();

        let started = Instant::now();
        handle.connect();
        assert_eq!(next_status(&mut rx).await, ConnectionStatus::Connecting);
        assert_eq!(next_status(&mut rx).await, ConnectionStatus::Reconnecting);
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_handshake() {
        let (handle, hub) = start(Arc::new(Hanging));
        let mut rx = hub.subscribe();

        handle.connect();
        assert_eq!(next_status(&mut rx).await, ConnectionStatus::Connecting);
        handle.disconnect();
        assert_eq!(next_status(&mut rx).await, ConnectionStatus::Disconnected);
        handle.sync().await;
        assert_eq!(handle.snapshot().seq, 2);
    }

    #[tokio::test]
    async fn test_disconnect_when_idle_is_silent() {
        let (handle, hub) = start(Arc::new(Hanging));
        let mut rx = hub.subscribe();

        handle.disconnect();
        handle.disconnect();
        handle.sync().await;
        assert!(rx.try_recv().is_err());
        assert_eq!(handle.snapshot(), StatusSnapshot::default());
    }
}
