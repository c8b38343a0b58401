//! Runnable execution relay server.
//!
//! Run with: cargo run -p stream-server-demo
//!
//! Create a session with `POST /sessions`, push events over `/ingest`,
//! and observe them over `/stream`.

use std::{net::SocketAddr, sync::Arc};

use exec_relay_core::EventStore;
use exec_relay_session::{LeaseConfig, LeaseManager};
use exec_relay_transport::{create_router, RelayState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let store = Arc::new(EventStore::new());
    let leases = Arc::new(LeaseManager::new(LeaseConfig::default()));
    let state = Arc::new(RelayState::new(store, leases));

    let app = create_router(state);

    let addr: SocketAddr = std::env::var("RELAY_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
        .parse()?;
    tracing::info!("Relay listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
