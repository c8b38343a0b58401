//! Typed stream event model.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Session identifier.
pub type SessionId = Uuid;

/// Execution identifier.
pub type ExecutionId = Uuid;

/// Kind of stream event.
///
/// Every execution lifecycle transition or output chunk becomes exactly
/// one event of one of these kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEventType {
    /// Execution began running against the session.
    ExecutionStarted,
    /// A chunk of agent output.
    OutputChunk,
    /// Tool invocation activity.
    ToolActivity,
    /// Execution finished successfully.
    ExecutionCompleted,
    /// Execution finished with an error.
    ExecutionFailed,
    /// Execution was interrupted.
    ExecutionInterrupted,
}

impl StreamEventType {
    /// Whether this event kind ends the execution it belongs to.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::ExecutionCompleted | Self::ExecutionFailed | Self::ExecutionInterrupted
        )
    }
}

/// A stored stream event.
///
/// `event_id` is assigned by the store on insert, never by the producer,
/// and is strictly increasing per session. It is the sole source of truth
/// for "what has the client already seen".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    /// Monotonic per-session id.
    pub event_id: u64,
    /// Execution this event belongs to.
    pub execution_id: ExecutionId,
    /// Owning session.
    pub session_id: SessionId,
    /// Event kind.
    pub event_type: StreamEventType,
    /// Event time (ISO-8601 on the wire).
    pub timestamp: DateTime<Utc>,
    /// Opaque payload.
    #[serde(default)]
    pub data: Value,
}

/// Producer-side event payload.
///
/// The executor pushes these over the ingest channel; the store assigns
/// the `event_id` and stamps the current time when `timestamp` is absent
/// or unparseable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestEvent {
    /// Event kind.
    pub event_type: StreamEventType,
    /// Optional producer timestamp: epoch milliseconds or ISO-8601 string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
    /// Opaque payload.
    #[serde(default)]
    pub data: Value,
}

impl IngestEvent {
    /// Create an ingest event with no producer timestamp.
    #[must_use]
    pub const fn new(event_type: StreamEventType, data: Value) -> Self {
        Self {
            event_type,
            timestamp: None,
            data,
        }
    }
}

/// Parse a timestamp value that may be epoch milliseconds or ISO-8601.
///
/// Returns `None` for invalid or absent values, leaving the corresponding
/// bound or stamp unset.
#[must_use]
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        Value::String(s) => parse_timestamp_str(s),
        _ => None,
    }
}

/// Parse a timestamp string: an integer is epoch milliseconds, anything
/// else is tried as ISO-8601.
#[must_use]
pub fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ms) = s.parse::<i64>() {
        return Utc.timestamp_millis_opt(ms).single();
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
