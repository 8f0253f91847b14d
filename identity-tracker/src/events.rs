//! Event log for tracking actions
//!
//! Every mapping mutation is emitted through the `log` facade under the
//! `identity_tracker::events` target, which is the durable audit sink. The
//! in-process log keeps only the most recent events for queries.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;

/// Events retained in memory by default
pub const DEFAULT_EVENT_CAPACITY: usize = 10_000;

/// What happened to a mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    Added,
    Removed,
    Updated,
}

impl EventAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "mapping_added",
            Self::Removed => "mapping_removed",
            Self::Updated => "mapping_updated",
        }
    }
}

/// One recorded tracking action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationEvent {
    pub timestamp: DateTime<Utc>,
    pub action: EventAction,
    pub external_id: String,
    pub vector_id: String,
    #[serde(default)]
    pub detail: Value,
}

/// Filter for [`EventLog::query`]
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub action: Option<EventAction>,
    pub external_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// In-process log retaining the most recent `capacity` events
pub struct EventLog {
    events: RwLock<VecDeque<ReconciliationEvent>>,
    capacity: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log that drops its oldest event once `capacity` are held
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append an event and emit it to the log sink
    pub fn record(
        &self,
        action: EventAction,
        external_id: &str,
        vector_id: &str,
        detail: Value,
    ) {
        let event = ReconciliationEvent {
            timestamp: Utc::now(),
            action,
            external_id: external_id.to_string(),
            vector_id: vector_id.to_string(),
            detail,
        };

        log::info!(
            target: "identity_tracker::events",
            "{} external_id={} vector_id={}",
            action.as_str(),
            external_id,
            vector_id
        );

        let mut events = self.events.write();
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Copy of every retained event in append order
    pub fn snapshot(&self) -> Vec<ReconciliationEvent> {
        self.events.read().iter().cloned().collect()
    }

    /// Events matching the filter, oldest first
    pub fn query(&self, query: &EventQuery) -> Vec<ReconciliationEvent> {
        let limit = query.limit.unwrap_or(usize::MAX);
        self.events
            .read()
            .iter()
            .filter(|e| query.action.map_or(true, |a| e.action == a))
            .filter(|e| {
                query
                    .external_id
                    .as_deref()
                    .map_or(true, |id| e.external_id == id)
            })
            .filter(|e| query.since.map_or(true, |t| e.timestamp >= t))
            .filter(|e| query.until.map_or(true, |t| e.timestamp < t))
            .take(limit)
            .cloned()
            .collect()
    }
}
