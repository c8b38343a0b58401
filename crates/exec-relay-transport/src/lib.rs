//! Server transport: WebSocket attach/ingest and the polling surface.
//!
//! The auth middleware terminating requests lives in front of this layer;
//! tickets arrive as query parameters already vetted by the gateway.

pub mod http;
pub mod protocol;
pub mod state;
pub mod websocket;

pub use state::RelayState;
pub use websocket::create_router;
