//! Scripted collaborators for driving the agent without a network.

#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use desktop_agent_core::{
    AgentEvent, CloseReason, ConnectionStatus, Connector, Credential, DeviceProfile, Established,
    HandshakeError, Inbound, Link, Outbound, PairingCode, PairingError, PairingService,
    RefreshError, Registration, ScopedFolderSet, TokenProvider, ToolExecutor, ToolOutput,
    ToolRequest, ToolResult, TransportError,
};
use tokio::{
    sync::{broadcast, mpsc},
    time::Instant,
};

/// What the next `open` call does.
#[derive(Debug, Clone)]
pub enum Step {
    /// Register and hand out this device id.
    Accept(&'static str),
    /// Refuse the credential.
    Reject,
    Fail,
}

/// Server end of an accepted link.
pub struct ServerSide {
    pub to_agent: mpsc::UnboundedSender<Inbound>,
    pub from_agent: mpsc::UnboundedReceiver<Outbound>,
    pub registration: Registration,
    pub token: Option<String>,
}

impl ServerSide {
    pub fn send(&self, inbound: Inbound) {
        self.to_agent.send(inbound).unwrap();
    }

    pub fn close(&self, reason: CloseReason) {
        self.send(Inbound::Closed(reason));
    }

    /// Next frame other than a heartbeat.
    pub async fn next_frame(&mut self) -> Outbound {
        loop {
            match self.from_agent.recv().await.expect("link dropped") {
                Outbound::Heartbeat => {}
                frame => return frame,
            }
        }
    }
}

/// Connector that follows a script. Once the script runs out, attempts hang.
pub struct ScriptedConnector {
    steps: Mutex<VecDeque<Step>>,
    accepted: mpsc::UnboundedSender<ServerSide>,
    attempts: AtomicUsize,
}

impl ScriptedConnector {
    pub fn new(steps: &[Step]) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerSide>) {
        let (accepted, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            steps: Mutex::new(steps.iter().cloned().collect()),
            accepted,
            attempts: AtomicUsize::new(0),
        });
        (connector, rx)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn open(
        &self,
        credential: Option<&Credential>,
        registration: &Registration,
    ) -> Result<Established, HandshakeError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Accept(device_id)) => {
                let (to_agent, inbound) = mpsc::unbounded_channel();
                let (outbound, from_agent) = mpsc::unbounded_channel();
                let _ = self.accepted.send(ServerSide {
                    to_agent,
                    from_agent,
                    registration: registration.clone(),
                    token: credential.map(|c| c.token().to_string()),
                });
                Ok(Established {
                    device_id: device_id.to_string(),
                    link: Box::new(ScriptedLink { inbound, outbound }),
                })
            }
            Some(Step::Reject) => Err(HandshakeError::Rejected("HTTP 401".into())),
            Some(Step::Fail) => Err(HandshakeError::Network("connection refused".into())),
            None => std::future::pending().await,
        }
    }
}

struct ScriptedLink {
    inbound: mpsc::UnboundedReceiver<Inbound>,
    outbound: mpsc::UnboundedSender<Outbound>,
}

#[async_trait]
impl Link for ScriptedLink {
    async fn send(&mut self, frame: Outbound) -> Result<(), TransportError> {
        self.outbound.send(frame).map_err(|_| TransportError::Closed)
    }

    async fn recv(&mut self) -> Inbound {
        self.inbound
            .recv()
            .await
            .unwrap_or_else(|| Inbound::Closed(CloseReason::Error("server gone".into())))
    }

    async fn close(&mut self) {}
}

/// `echo` returns its params; `sleep` waits `params.secs` seconds first.
pub struct TestTools;

#[async_trait]
impl ToolExecutor for TestTools {
    async fn execute(&self, request: &ToolRequest, _scope: &ScopedFolderSet) -> ToolResult {
        if request.tool == "sleep" {
            let secs = request.params["secs"].as_u64().unwrap_or(1);
            tokio::time::sleep(Duration::from_secs(secs)).await;
        }
        Ok(ToolOutput::json(request.params.clone()))
    }
}

/// Token provider that records when it was asked.
#[derive(Default)]
pub struct RecordingProvider {
    calls: Mutex<Vec<Instant>>,
}

impl RecordingProvider {
    pub fn calls(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TokenProvider for RecordingProvider {
    async fn fetch_token(&self) -> Result<String, RefreshError> {
        let mut calls = self.calls.lock().unwrap();
        calls.push(Instant::now());
        Ok(format!("jwt-{}", calls.len()))
    }
}

/// Pairing service accepting exactly one code.
pub struct OneCode {
    pub code: &'static str,
    pub seen: Mutex<Vec<String>>,
}

#[async_trait]
impl PairingService for OneCode {
    async fn claim(
        &self,
        code: &PairingCode,
        _device: &DeviceProfile,
    ) -> Result<Credential, PairingError> {
        self.seen.lock().unwrap().push(code.to_string());
        if code.as_str() == self.code {
            Ok(Credential::device("paired-token"))
        } else {
            Err(PairingError::Rejected("Invalid or expired code".into()))
        }
    }
}

/// Next status transition, skipping other events.
pub async fn next_status(rx: &mut broadcast::Receiver<AgentEvent>) -> (ConnectionStatus, Option<String>) {
    loop {
        if let AgentEvent::StatusChanged {
            status, device_id, ..
        } = rx.recv().await.unwrap()
        {
            return (status, device_id);
        }
    }
}

/// Skip events until one matches.
pub async fn wait_for_event<F>(rx: &mut broadcast::Receiver<AgentEvent>, matches: F) -> AgentEvent
where
    F: Fn(&AgentEvent) -> bool,
{
    loop {
        let event = rx.recv().await.unwrap();
        if matches(&event) {
            return event;
        }
    }
}

/// Poll `check` every 10ms of virtual time, for up to two minutes.
pub async fn eventually<F>(check: F)
where
    F: Fn() -> bool,
{
    for _ in 0..12_000 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}
