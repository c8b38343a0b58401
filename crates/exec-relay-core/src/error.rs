//! Protocol error codes and store errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::SessionId;

/// Protocol-boundary error codes.
///
/// Each maps to a distinct WebSocket close code and a snake_case reason
/// string; clients classify close frames against these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseCode {
    /// Malformed frame or query parameters.
    ProtocolError,
    /// Missing, expired, or invalid ticket.
    AuthError,
    /// Unknown session.
    SessionNotFound,
    /// Unknown execution.
    ExecutionNotFound,
    /// A second concurrent ingest connection for the same execution.
    DuplicateIngest,
    /// Unexpected server-side failure.
    InternalError,
}

impl CloseCode {
    /// WebSocket close code for this error.
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::ProtocolError => 4400,
            Self::AuthError => 4401,
            Self::SessionNotFound => 4404,
            Self::ExecutionNotFound => 4405,
            Self::DuplicateIngest => 4409,
            Self::InternalError => 4500,
        }
    }

    /// Close reason string.
    #[must_use]
    pub const fn reason(self) -> &'static str {
        match self {
            Self::ProtocolError => "protocol_error",
            Self::AuthError => "auth_error",
            Self::SessionNotFound => "session_not_found",
            Self::ExecutionNotFound => "execution_not_found",
            Self::DuplicateIngest => "duplicate_ingest",
            Self::InternalError => "internal_error",
        }
    }

    /// Reverse mapping from a wire close code.
    #[must_use]
    pub const fn from_code(code: u16) -> Option<Self> {
        match code {
            4400 => Some(Self::ProtocolError),
            4401 => Some(Self::AuthError),
            4404 => Some(Self::SessionNotFound),
            4405 => Some(Self::ExecutionNotFound),
            4409 => Some(Self::DuplicateIngest),
            4500 => Some(Self::InternalError),
            _ => None,
        }
    }
}

/// Event store error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),
    #[error("Store error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_codes_roundtrip() {
        for code in [
            CloseCode::ProtocolError,
            CloseCode::AuthError,
            CloseCode::SessionNotFound,
            CloseCode::ExecutionNotFound,
            CloseCode::DuplicateIngest,
            CloseCode::InternalError,
        ] {
            assert_eq!(CloseCode::from_code(code.code()), Some(code));
        }
        assert_eq!(CloseCode::from_code(1000), None);
    }

    #[test]
    fn reasons_are_snake_case_names() {
        assert_eq!(CloseCode::AuthError.reason(), "auth_error");
        assert_eq!(
            serde_json::to_string(&CloseCode::DuplicateIngest).unwrap(),
            "\"duplicate_ingest\""
        );
    }
}
