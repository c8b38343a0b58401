//! Tail a session's event stream from the terminal.
//!
//! Run with: cargo run -p tail-client-demo -- <session-id>
//!
//! Reconnects with the replay cursor on drops; Ctrl-C disconnects.

use std::sync::Arc;

use anyhow::Context as _;
use exec_relay_client::{
    DefaultAuthDetector, NoTicketProvider, StreamClient, StreamClientConfig,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let session_id: Uuid = std::env::args()
        .nth(1)
        .context("usage: tail-client-demo <session-id>")?
        .parse()
        .context("session id must be a UUID")?;

    let server_url =
        std::env::var("RELAY_URL").unwrap_or_else(|_| "ws://127.0.0.1:3000".to_string());

    let config = StreamClientConfig::new(server_url, session_id);
    let (client, mut events) = StreamClient::connect(
        config,
        Arc::new(NoTicketProvider),
        Arc::new(DefaultAuthDetector),
    );

    let mut state_rx = client.watch_state();
    loop {
        tokio::select! {
            maybe_event = events.recv() => {
                let Some(event) = maybe_event else { break };
                println!(
                    "[{}] #{} {:?} {}",
                    event.timestamp.to_rfc3339(),
                    event.event_id,
                    event.event_type,
                    event.data
                );
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = state_rx.borrow().clone();
                tracing::info!(?state, "connection state changed");
                if state.is_terminal() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                client.disconnect();
            }
        }
    }

    Ok(())
}
