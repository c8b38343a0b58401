//! Client connection state.

use exec_relay_core::ExecutionId;
use serde::{Deserialize, Serialize};

/// Connection lifecycle as a closed sum type; exactly one state is active
/// at a time, and invalid combinations are unrepresentable.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not connected; terminal after an intentional `disconnect()`.
    #[default]
    Disconnected,
    /// A connection attempt is underway.
    Connecting,
    /// Live and streaming. Carries the execution this subscription is
    /// scoped to, when the caller scoped it.
    Connected { execution_id: Option<ExecutionId> },
    /// Waiting out a backoff before the next attempt.
    Reconnecting {
        last_event_id: Option<u64>,
        attempt: u32,
    },
    /// An auth failure triggered a ticket refresh.
    RefreshingTicket,
    /// Terminal failure. `retryable` tells a UI whether a manual retry
    /// makes sense.
    Error { message: String, retryable: bool },
}

impl ConnectionState {
    /// Whether this state ends the connection's lifecycle.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Error { .. })
    }
}
