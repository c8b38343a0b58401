//! Query-parameter and frame parsing for the stream/ingest endpoints.

use std::collections::HashSet;

use exec_relay_core::{EventFilter, ExecutionId, SessionId, StreamEventType};
use serde::Deserialize;
use thiserror::Error;

/// Parameter parse error. Maps to a pre-upgrade HTTP 400.
#[derive(Debug, Error)]
pub enum ParamError {
    #[error("Invalid execution id: {0}")]
    InvalidExecutionId(String),
    #[error("Invalid event type: {0}")]
    InvalidEventType(String),
}

/// Query parameters for `GET /stream`.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamParams {
    pub session_id: SessionId,
    /// Exclusive replay cursor.
    #[serde(default)]
    pub from_id: Option<u64>,
    /// Comma-separated execution ids.
    #[serde(default)]
    pub execution_ids: Option<String>,
    /// Comma-separated snake_case event types.
    #[serde(default)]
    pub event_types: Option<String>,
    /// Epoch milliseconds or ISO-8601.
    #[serde(default)]
    pub start_time: Option<String>,
    /// Epoch milliseconds or ISO-8601.
    #[serde(default)]
    pub end_time: Option<String>,
    /// Stream attach ticket, vetted by the gateway in front of us.
    #[serde(default)]
    pub ticket: Option<String>,
}

impl StreamParams {
    /// Build the subscription filter.
    ///
    /// Unparseable timestamps leave the bound unset; malformed id/type
    /// lists are protocol errors.
    ///
    /// # Errors
    /// Returns [`ParamError`] for malformed execution ids or event types.
    pub fn filter(&self) -> Result<EventFilter, ParamError> {
        let execution_ids = self
            .execution_ids
            .as_deref()
            .map(parse_execution_ids)
            .transpose()?;
        let event_types = self
            .event_types
            .as_deref()
            .map(parse_event_types)
            .transpose()?;

        Ok(EventFilter {
            execution_ids,
            event_types,
            start_time: self
                .start_time
                .as_deref()
                .and_then(exec_relay_core::event::parse_timestamp_str),
            end_time: self
                .end_time
                .as_deref()
                .and_then(exec_relay_core::event::parse_timestamp_str),
            from_id: self.from_id,
        })
    }
}

/// Query parameters for `GET /ingest`.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestParams {
    pub session_id: SessionId,
    pub execution_id: ExecutionId,
    /// Ingest token minted with the job context.
    #[serde(default)]
    pub token: Option<String>,
}

fn parse_execution_ids(raw: &str) -> Result<HashSet<ExecutionId>, ParamError> {
    raw.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(|part| {
            part.trim()
                .parse()
                .map_err(|_| ParamError::InvalidExecutionId(part.trim().to_string()))
        })
        .collect()
}

fn parse_event_types(raw: &str) -> Result<HashSet<StreamEventType>, ParamError> {
    raw.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(|part| {
            let trimmed = part.trim();
            serde_json::from_value(serde_json::Value::String(trimmed.to_string()))
                .map_err(|_| ParamError::InvalidEventType(trimmed.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn params(session_id: SessionId) -> StreamParams {
        StreamParams {
            session_id,
            from_id: None,
            execution_ids: None,
            event_types: None,
            start_time: None,
            end_time: None,
            ticket: None,
        }
    }

    #[test]
    fn empty_params_mean_no_filtering() {
        let filter = params(Uuid::new_v4()).filter().unwrap();
        assert!(filter.execution_ids.is_none());
        assert!(filter.event_types.is_none());
        assert!(filter.start_time.is_none());
        assert!(filter.end_time.is_none());
        assert!(filter.from_id.is_none());
    }

    #[test]
    fn id_and_type_lists_are_comma_separated() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut p = params(Uuid::new_v4());
        p.execution_ids = Some(format!("{a}, {b}"));
        p.event_types = Some("output_chunk,execution_completed".into());
        p.from_id = Some(42);

        let filter = p.filter().unwrap();
        assert_eq!(filter.execution_ids.unwrap(), HashSet::from([a, b]));
        assert_eq!(
            filter.event_types.unwrap(),
            HashSet::from([
                StreamEventType::OutputChunk,
                StreamEventType::ExecutionCompleted
            ])
        );
        assert_eq!(filter.from_id, Some(42));
    }

    #[test]
    fn malformed_lists_are_protocol_errors() {
        let mut p = params(Uuid::new_v4());
        p.execution_ids = Some("not-a-uuid".into());
        assert!(matches!(
            p.filter(),
            Err(ParamError::InvalidExecutionId(_))
        ));

        let mut p = params(Uuid::new_v4());
        p.event_types = Some("launch_missiles".into());
        assert!(matches!(p.filter(), Err(ParamError::InvalidEventType(_))));
    }

    #[test]
    fn bad_timestamps_leave_bounds_unset() {
        let mut p = params(Uuid::new_v4());
        p.start_time = Some("1700000000000".into());
        p.end_time = Some("whenever".into());

        let filter = p.filter().unwrap();
        assert_eq!(
            filter.start_time.unwrap().timestamp_millis(),
            1_700_000_000_000
        );
        assert!(filter.end_time.is_none());
    }
}
