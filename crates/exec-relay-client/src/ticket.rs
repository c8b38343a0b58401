//! Reconnect ticket refresh boundary.

use async_trait::async_trait;
use thiserror::Error;

/// Ticket refresh error.
#[derive(Debug, Error)]
pub enum TicketError {
    #[error("Ticket refresh failed: {0}")]
    RefreshFailed(String),
    #[error("Ticket issuer unavailable")]
    Unavailable,
}

/// Issues fresh stream-attach tickets.
///
/// Invoked at most once per auth-failure cycle; a failure here is
/// terminal for the connection.
#[async_trait]
pub trait TicketProvider: Send + Sync {
    /// Obtain a fresh ticket.
    ///
    /// # Errors
    /// Returns [`TicketError`] when a ticket cannot be issued.
    async fn refresh_ticket(&self) -> Result<String, TicketError>;
}

/// Provider for deployments without ticket auth: never refreshes.
#[derive(Debug, Default, Clone)]
pub struct NoTicketProvider;

#[async_trait]
impl TicketProvider for NoTicketProvider {
    async fn refresh_ticket(&self) -> Result<String, TicketError> {
        Err(TicketError::Unavailable)
    }
}
