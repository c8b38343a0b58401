//! Reconnect behavior against a local WebSocket server.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use futures::SinkExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::{
    handshake::server::{Request, Response},
    protocol::{frame::coding::CloseCode, CloseFrame},
    Message,
};
use uuid::Uuid;

use exec_relay_client::{
    ConnectionState, DefaultAuthDetector, ReconnectPolicy, StreamClient, StreamClientConfig,
    TicketError, TicketProvider,
};

struct CountingTickets {
    calls: Arc<Mutex<u32>>,
}

#[async_trait]
impl TicketProvider for CountingTickets {
    async fn refresh_ticket(&self) -> Result<String, TicketError> {
        *self.calls.lock().unwrap() += 1;
        Ok("fresh".to_string())
    }
}

struct FailingTickets;

#[async_trait]
impl TicketProvider for FailingTickets {
    async fn refresh_ticket(&self) -> Result<String, TicketError> {
        Err(TicketError::Unavailable)
    }
}

fn fast_policy() -> ReconnectPolicy {
    ReconnectPolicy {
        max_attempts: 5,
        base_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(50),
    }
}

fn event_json(session_id: Uuid, event_id: u64) -> String {
    serde_json::json!({
        "event_id": event_id,
        "execution_id": Uuid::new_v4(),
        "session_id": session_id,
        "event_type": "output_chunk",
        "timestamp": "2024-01-15T10:30:00Z",
        "data": { "text": "chunk" },
    })
    .to_string()
}

/// Accept one connection, recording the request URI.
async fn accept_recording_uri(
    listener: &TcpListener,
    uris: &Arc<Mutex<Vec<String>>>,
) -> tokio_tungstenite::WebSocketStream<TcpStream> {
    let (stream, _) = listener.accept().await.unwrap();
    let uris = Arc::clone(uris);
    tokio_tungstenite::accept_hdr_async(stream, move |req: &Request, resp: Response| {
        uris.lock().unwrap().push(req.uri().to_string());
        Ok(resp)
    })
    .await
    .unwrap()
}

fn auth_close() -> Option<CloseFrame> {
    Some(CloseFrame {
        code: CloseCode::from(4401),
        reason: "auth_error".into(),
    })
}

#[tokio::test]
async fn reconnect_resumes_from_last_event_id() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let uris = Arc::new(Mutex::new(Vec::new()));
    let session_id = Uuid::new_v4();

    let config = StreamClientConfig {
        server_url: format!("ws://{addr}"),
        session_id,
        execution_id: None,
        ticket: None,
        policy: fast_policy(),
    };
    let (client, mut events) = StreamClient::connect(
        config,
        Arc::new(FailingTickets),
        Arc::new(DefaultAuthDetector),
    );

    // First attach carries no cursor.
    let mut socket = accept_recording_uri(&listener, &uris).await;
    socket
        .send(Message::Text(event_json(session_id, 5).into()))
        .await
        .unwrap();

    let received = events.recv().await.unwrap();
    assert_eq!(received.event_id, 5);
    assert_eq!(received.session_id, session_id);

    // Server drops the connection without an auth cause.
    socket.close(None).await.unwrap();
    drop(socket);

    // The client comes back with the replay cursor.
    let _socket2 = accept_recording_uri(&listener, &uris).await;
    {
        let uris = uris.lock().unwrap();
        assert!(!uris[0].contains("from_id"));
        assert!(uris[1].contains("from_id=5"));
        assert!(uris[1].contains(&format!("session_id={session_id}")));
    }

    client.disconnect();
    let mut state_rx = client.watch_state();
    state_rx
        .wait_for(|s| *s == ConnectionState::Disconnected)
        .await
        .unwrap();
}

#[tokio::test]
async fn auth_close_refreshes_ticket_once_then_is_terminal() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let uris = Arc::new(Mutex::new(Vec::new()));
    let calls = Arc::new(Mutex::new(0));
    let session_id = Uuid::new_v4();

    let config = StreamClientConfig {
        server_url: format!("ws://{addr}"),
        session_id,
        execution_id: None,
        ticket: Some("stale".into()),
        policy: fast_policy(),
    };
    let (client, _events) = StreamClient::connect(
        config,
        Arc::new(CountingTickets {
            calls: Arc::clone(&calls),
        }),
        Arc::new(DefaultAuthDetector),
    );

    // Reject the stale ticket with an auth close.
    let mut socket = accept_recording_uri(&listener, &uris).await;
    socket.close(auth_close()).await.unwrap();
    drop(socket);

    // One refresh, and the retry carries the fresh ticket.
    let mut socket2 = accept_recording_uri(&listener, &uris).await;
    {
        let uris = uris.lock().unwrap();
        assert!(uris[0].contains("ticket=stale"));
        assert!(uris[1].contains("ticket=fresh"));
    }
    assert_eq!(*calls.lock().unwrap(), 1);

    // A second consecutive auth failure is a configuration error, not
    // another refresh.
    socket2.close(auth_close()).await.unwrap();
    drop(socket2);

    let mut state_rx = client.watch_state();
    let state = state_rx
        .wait_for(ConnectionState::is_terminal)
        .await
        .unwrap()
        .clone();
    assert!(matches!(
        state,
        ConnectionState::Error {
            retryable: false,
            ..
        }
    ));
    assert_eq!(*calls.lock().unwrap(), 1);
}

#[tokio::test]
async fn failed_ticket_refresh_is_terminal() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let uris = Arc::new(Mutex::new(Vec::new()));
    let session_id = Uuid::new_v4();

    let config = StreamClientConfig {
        server_url: format!("ws://{addr}"),
        session_id,
        execution_id: None,
        ticket: Some("stale".into()),
        policy: fast_policy(),
    };
    let (client, _events) = StreamClient::connect(
        config,
        Arc::new(FailingTickets),
        Arc::new(DefaultAuthDetector),
    );

    let mut socket = accept_recording_uri(&listener, &uris).await;
    socket.close(auth_close()).await.unwrap();
    drop(socket);

    let mut state_rx = client.watch_state();
    let state = state_rx
        .wait_for(ConnectionState::is_terminal)
        .await
        .unwrap()
        .clone();
    assert!(matches!(
        state,
        ConnectionState::Error {
            retryable: false,
            ..
        }
    ));
}

#[tokio::test]
async fn reconnect_budget_exhaustion_is_terminal() {
    // Bind to learn a dead address, then refuse every connection.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = StreamClientConfig {
        server_url: format!("ws://{addr}"),
        session_id: Uuid::new_v4(),
        execution_id: None,
        ticket: None,
        policy: ReconnectPolicy {
            max_attempts: 2,
            base_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
        },
    };
    let (client, _events) = StreamClient::connect(
        config,
        Arc::new(FailingTickets),
        Arc::new(DefaultAuthDetector),
    );

    let mut state_rx = client.watch_state();
    let state = state_rx
        .wait_for(ConnectionState::is_terminal)
        .await
        .unwrap()
        .clone();
    let ConnectionState::Error { message, retryable } = state else {
        panic!("expected terminal error, got {state:?}");
    };
    assert!(!retryable);
    assert!(message.contains("exhausted"));
}

#[tokio::test]
async fn disconnect_is_idempotent_from_any_state() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let config = StreamClientConfig {
        server_url: format!("ws://{addr}"),
        session_id: Uuid::new_v4(),
        execution_id: None,
        ticket: None,
        policy: fast_policy(),
    };
    let (client, _events) = StreamClient::connect(
        config,
        Arc::new(FailingTickets),
        Arc::new(DefaultAuthDetector),
    );

    // Disconnect while still connecting, twice.
    client.disconnect();
    client.disconnect();

    let mut state_rx = client.watch_state();
    state_rx
        .wait_for(|s| *s == ConnectionState::Disconnected)
        .await
        .unwrap();
    assert_eq!(client.state(), ConnectionState::Disconnected);
}
