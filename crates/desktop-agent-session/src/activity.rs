//! Activity correlator: folds tool events into the bounded feed.

use std::sync::{Arc, Mutex, PoisonError};

use desktop_agent_core::{ActivityEvent, ActivityFeed, AgentEvent, activity::now_millis};
use tokio::{sync::broadcast, task::JoinHandle};

/// Shared view of recent tool activity.
///
/// One task applies events in hub order, so updates for the same id never
/// race. Readers take a snapshot.
#[derive(Debug, Clone, Default)]
pub struct ActivityLog {
    feed: Arc<Mutex<ActivityFeed>>,
}

impl ActivityLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Events newest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ActivityEvent> {
        self.feed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }

    /// Apply one hub event. Non-tool events are ignored.
    pub fn apply(&self, event: &AgentEvent) {
        let mut feed = self.feed.lock().unwrap_or_else(PoisonError::into_inner);
        match event {
            AgentEvent::ToolStarted {
                request_id,
                tool,
                params,
            } => {
                feed.start(
                    request_id.clone(),
                    tool.clone(),
                    params.clone(),
                    now_millis(),
                );
            }
            AgentEvent::ToolCompleted { request_id, status } => {
                feed.complete(request_id, *status);
            }
            _ => {}
        }
    }

    /// Follow `events` until the hub closes.
    #[must_use]
    pub fn spawn(&self, mut events: broadcast::Receiver<AgentEvent>) -> JoinHandle<()> {
        let log = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => log.apply(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "activity feed missed events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
