//! Conjunctive event filters for replay queries and live matching.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::event::{ExecutionId, StreamEvent, StreamEventType};

/// Filter over stream events. All populated dimensions must match.
///
/// `from_id` participates only in replay queries — a live event is by
/// construction newer than any existing cursor, so [`EventFilter::matches`]
/// ignores it.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Restrict to these executions.
    pub execution_ids: Option<HashSet<ExecutionId>>,
    /// Restrict to these event kinds.
    pub event_types: Option<HashSet<StreamEventType>>,
    /// Inclusive lower timestamp bound.
    pub start_time: Option<DateTime<Utc>>,
    /// Inclusive upper timestamp bound.
    pub end_time: Option<DateTime<Utc>>,
    /// Exclusive replay cursor: only events with `event_id > from_id`.
    pub from_id: Option<u64>,
}

impl EventFilter {
    /// Filter that matches every event.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to a single execution.
    #[must_use]
    pub fn for_execution(execution_id: ExecutionId) -> Self {
        Self {
            execution_ids: Some(HashSet::from([execution_id])),
            ..Self::default()
        }
    }

    /// Whether a live event should be pushed to a subscriber holding this
    /// filter. Conjunctive over execution ids, event types, and the
    /// timestamp range; the replay cursor is not consulted.
    #[must_use]
    pub fn matches(&self, event: &StreamEvent) -> bool {
        if let Some(ids) = &self.execution_ids {
            if !ids.contains(&event.execution_id) {
                return false;
            }
        }
        if let Some(types) = &self.event_types {
            if !types.contains(&event.event_type) {
                return false;
            }
        }
        if let Some(start) = self.start_time {
            if event.timestamp < start {
                return false;
            }
        }
        if let Some(end) = self.end_time {
            if event.timestamp > end {
                return false;
            }
        }
        true
    }
}
