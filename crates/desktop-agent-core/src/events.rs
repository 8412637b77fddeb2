//! Ordered publish/subscribe hub for outbound notifications.

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::{ActivityStatus, ConnectionStatus, StatusSnapshot};

/// Default channel capacity. A subscriber that falls further behind than
/// this observes a gap and should re-read the status snapshot.
const EVENT_CAPACITY: usize = 1024;

/// Notification pushed to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AgentEvent {
    /// The connection status changed. `seq` increases by one per transition.
    StatusChanged {
        status: ConnectionStatus,
        device_id: Option<String>,
        seq: u64,
    },
    /// The service rejected the credential; re-pairing or re-sign-in needed.
    CredentialInvalid,
    /// The transport wants a fresh credential before its next attempt.
    RefreshNeeded,
    /// A tool request arrived over the live connection.
    ToolStarted {
        request_id: String,
        tool: String,
        params: Value,
    },
    /// A tool request finished.
    ToolCompleted {
        request_id: String,
        status: ActivityStatus,
    },
}

impl AgentEvent {
    /// Event name as exposed to UI listeners.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::StatusChanged { .. } => "ws:status_changed",
            Self::CredentialInvalid => "token_invalid",
            Self::RefreshNeeded => "token_refresh_needed",
            Self::ToolStarted { .. } => "tool:request_started",
            Self::ToolCompleted { .. } => "tool:request_completed",
        }
    }
}

impl From<&StatusSnapshot> for AgentEvent {
    fn from(snapshot: &StatusSnapshot) -> Self {
        Self::StatusChanged {
            status: snapshot.status,
            device_id: snapshot.device_id.clone(),
            seq: snapshot.seq,
        }
    }
}

/// Broadcast hub. Every subscriber sees events in publish order.
///
/// Dropping a receiver (or the stream) is how a listener unsubscribes.
#[derive(Debug, Clone)]
pub struct EventHub {
    sender: broadcast::Sender<AgentEvent>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    /// Create a hub with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(EVENT_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish to all current subscribers. Events with no subscriber are dropped.
    pub fn push(&self, event: AgentEvent) {
        tracing::trace!(event = event.name(), "publishing");
        let _ = self.sender.send(event);
    }

    /// Publish a status transition.
    pub fn push_status(&self, snapshot: &StatusSnapshot) {
        self.push(AgentEvent::from(snapshot));
    }

    /// Publish a credential-invalid notification.
    pub fn push_credential_invalid(&self) {
        self.push(AgentEvent::CredentialInvalid);
    }

    /// Publish a refresh-needed notification.
    pub fn push_refresh_needed(&self) {
        self.push(AgentEvent::RefreshNeeded);
    }

    /// Publish a tool start.
    pub fn push_tool_started(&self, request_id: &str, tool: &str, params: &Value) {
        self.push(AgentEvent::ToolStarted {
            request_id: request_id.to_string(),
            tool: tool.to_string(),
            params: params.clone(),
        });
    }

    /// Publish a tool completion.
    pub fn push_tool_completed(&self, request_id: &str, status: ActivityStatus) {
        self.push(AgentEvent::ToolCompleted {
            request_id: request_id.to_string(),
            status,
        });
    }

    /// Receiver for live events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.sender.subscribe()
    }

    /// Live events as a stream. Gaps from lagging are logged and skipped.
    #[must_use]
    pub fn stream(&self) -> futures::stream::BoxStream<'static, AgentEvent> {
        BroadcastStream::new(self.subscribe())
            .filter_map(|res| async move {
                match res {
                    Ok(event) => Some(event),
                    Err(err) => {
                        tracing::warn!("event subscriber lagged: {err}");
                        None
                    }
                }
            })
            .boxed()
    }
}
