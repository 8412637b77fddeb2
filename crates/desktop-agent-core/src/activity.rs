//! Bounded feed of recent tool invocations.

use std::{
    collections::HashMap,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Number of events kept in the feed.
pub const ACTIVITY_CAPACITY: usize = 20;

/// Lifecycle of one tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    Pending,
    Success,
    Error,
}

/// One entry in the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    /// Request id; correlates start and completion.
    pub id: String,
    pub tool: String,
    /// Parameters as received.
    pub params: Value,
    pub status: ActivityStatus,
    /// Creation time, Unix epoch milliseconds.
    pub timestamp: i64,
}

/// Fixed-capacity ring of activity events with O(1) lookup by id.
///
/// Display order is insertion order, newest first; completing an event
/// changes its status in place and never moves it. Completions for ids
/// that were evicted (or never seen) are dropped.
#[derive(Debug, Clone)]
pub struct ActivityFeed {
    slots: Vec<Option<ActivityEvent>>,
    /// Slot the next insert writes. Once full, this is the oldest entry.
    next: usize,
    len: usize,
    index: HashMap<String, usize>,
}

impl Default for ActivityFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityFeed {
    /// Feed with the standard capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(ACTIVITY_CAPACITY)
    }

    /// Feed holding at most `capacity` events (minimum 1).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: vec![None; capacity],
            next: 0,
            len: 0,
            index: HashMap::with_capacity(capacity),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Record a started invocation at the head of the feed.
    ///
    /// Evicts the oldest entry when full. Returns `false` (and changes
    /// nothing) if `id` is already in the window.
    pub fn start(&mut self, id: String, tool: String, params: Value, timestamp: i64) -> bool {
        if self.index.contains_key(&id) {
            tracing::debug!(request_id = %id, "duplicate activity start ignored");
            return false;
        }

        let slot = self.next;
        if let Some(evicted) = self.slots[slot].take() {
            self.index.remove(&evicted.id);
            tracing::trace!(request_id = %evicted.id, "activity evicted");
        }

        self.index.insert(id.clone(), slot);
        self.slots[slot] = Some(ActivityEvent {
            id,
            tool,
            params,
            status: ActivityStatus::Pending,
            timestamp,
        });
        self.next = (slot + 1) % self.capacity();
        self.len = (self.len + 1).min(self.capacity());
        true
    }

    /// Update the status of `id` in place.
    ///
    /// Returns `false` when the id is not in the window.
    pub fn complete(&mut self, id: &str, status: ActivityStatus) -> bool {
        let Some(&slot) = self.index.get(id) else {
            tracing::trace!(request_id = %id, "completion for unknown activity dropped");
            return false;
        };
        match self.slots[slot].as_mut() {
            Some(event) => {
                event.status = status;
                true
            }
            None => false,
        }
    }

    /// Look up an event by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ActivityEvent> {
        self.index
            .get(id)
            .and_then(|&slot| self.slots[slot].as_ref())
    }

    /// Events newest first.
    pub fn iter(&self) -> impl Iterator<Item = &ActivityEvent> + '_ {
        let capacity = self.capacity();
        (0..self.len).filter_map(move |offset| {
            let slot = (self.next + capacity - 1 - offset) % capacity;
            self.slots[slot].as_ref()
        })
    }

    /// Owned copy of the feed, newest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ActivityEvent> {
        self.iter().cloned().collect()
    }
}

/// Current time as Unix epoch milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn start(feed: &mut ActivityFeed, id: &str) -> bool {
        feed.start(id.to_string(), "read_file".to_string(), json!({}), 0)
    }

    fn ids(feed: &ActivityFeed) -> Vec<String> {
        feed.iter().map(|e| e.id.clone()).collect()
    }

    #[test]
    fn test_newest_first() {
        let mut feed = ActivityFeed::new();
        start(&mut feed, "a");
        start(&mut feed, "b");
        start(&mut feed, "c");
        assert_eq!(ids(&feed), ["c", "b", "a"]);
        assert_eq!(feed.get("b").unwrap().status, ActivityStatus::Pending);
    }

    #[test]
    fn test_twenty_first_evicts_exactly_the_oldest() {
        let mut feed = ActivityFeed::new();
        for i in 0..ACTIVITY_CAPACITY {
            start(&mut feed, &format!("req-{i}"));
        }
        assert_eq!(feed.len(), ACTIVITY_CAPACITY);

        start(&mut feed, "req-20");
        assert_eq!(feed.len(), ACTIVITY_CAPACITY);
        assert!(feed.get("req-0").is_none());
        assert!(feed.get("req-1").is_some());

        let order = ids(&feed);
        assert_eq!(order.first().map(String::as_str), Some("req-20"));
        assert_eq!(order.last().map(String::as_str), Some("req-1"));
    }

    #[test]
    fn test_completion_keeps_position() {
        let mut feed = ActivityFeed::new();
        start(&mut feed, "first");
        start(&mut feed, "second");
        assert!(feed.complete("first", ActivityStatus::Success));
        assert_eq!(ids(&feed), ["second", "first"]);
        assert_eq!(feed.get("first").unwrap().status, ActivityStatus::Success);
    }

    #[test]
    fn test_unknown_completion_is_noop() {
        let mut feed = ActivityFeed::new();
        start(&mut feed, "a");
        let before = feed.snapshot();
        assert!(!feed.complete("missing", ActivityStatus::Error));
        assert_eq!(feed.snapshot(), before);
    }

    #[test]
    fn test_completion_after_eviction_dropped() {
        let mut feed = ActivityFeed::with_capacity(2);
        start(&mut feed, "old");
        start(&mut feed, "mid");
        start(&mut feed, "new");
        assert!(!feed.complete("old", ActivityStatus::Success));
        assert_eq!(ids(&feed), ["new", "mid"]);
    }

    #[test]
    fn test_out_of_order_completion() {
        let mut feed = ActivityFeed::new();
        start(&mut feed, "a");
        start(&mut feed, "b");
        assert!(feed.complete("b", ActivityStatus::Error));
        start(&mut feed, "c");
        assert!(feed.complete("a", ActivityStatus::Success));
        let statuses: Vec<_> = feed.iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            [
                ActivityStatus::Pending,
                ActivityStatus::Error,
                ActivityStatus::Success
            ]
        );
    }

    #[test]
    fn test_duplicate_start_ignored() {
        let mut feed = ActivityFeed::new();
        assert!(start(&mut feed, "a"));
        assert!(!start(&mut feed, "a"));
        assert_eq!(feed.len(), 1);
    }
}
