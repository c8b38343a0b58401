//! Reconnecting stream client.
//!
//! Owns the WebSocket lifecycle on the consuming side: connect,
//! replay-aware reconnect, ticket refresh on auth failure, exponential
//! backoff, cancellation. Failures never escape `connect`/`disconnect`;
//! they surface through the state channel, which is the single source of
//! truth for the connection.

pub mod connection;
pub mod policy;
pub mod state;
pub mod ticket;

pub use connection::{StreamClient, StreamClientConfig};
pub use policy::{AuthFailureDetector, CloseInfo, DefaultAuthDetector, ReconnectPolicy};
pub use state::ConnectionState;
pub use ticket::{NoTicketProvider, TicketError, TicketProvider};
