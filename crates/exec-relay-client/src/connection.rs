//! Connection driver: one task owns one socket at a time.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use rand::Rng;
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch},
};
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use url::Url;

use exec_relay_core::{ExecutionId, SessionId, StreamEvent};

use crate::{
    policy::{AuthFailureDetector, CloseInfo, ReconnectPolicy},
    state::ConnectionState,
    ticket::TicketProvider,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Stream client configuration.
#[derive(Debug, Clone)]
pub struct StreamClientConfig {
    /// Relay base URL, e.g. `ws://127.0.0.1:3000`.
    pub server_url: String,
    /// Session to attach to.
    pub session_id: SessionId,
    /// Scope the subscription to one execution.
    pub execution_id: Option<ExecutionId>,
    /// Initial attach ticket.
    pub ticket: Option<String>,
    /// Reconnect backoff and budget.
    pub policy: ReconnectPolicy,
}

impl StreamClientConfig {
    /// Config with default policy, no ticket, and no execution scope.
    #[must_use]
    pub fn new(server_url: impl Into<String>, session_id: SessionId) -> Self {
        Self {
            server_url: server_url.into(),
            session_id,
            execution_id: None,
            ticket: None,
            policy: ReconnectPolicy::default(),
        }
    }
}

/// Handle to a streaming connection.
///
/// `connect` and `disconnect` never fail; the state channel is the single
/// source of truth and carries every failure as a state transition.
pub struct StreamClient {
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
}

impl StreamClient {
    /// Spawn the connection driver and return the handle plus the event
    /// channel. Must be called within a tokio runtime.
    #[must_use]
    pub fn connect(
        config: StreamClientConfig,
        tickets: Arc<dyn TicketProvider>,
        detector: Arc<dyn AuthFailureDetector>,
    ) -> (Self, mpsc::UnboundedReceiver<StreamEvent>) {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_driver(
            config,
            tickets,
            detector,
            state_tx.clone(),
            shutdown_rx,
            events_tx,
        ));

        (
            Self {
                state_tx,
                state_rx,
                shutdown_tx,
            },
            events_rx,
        )
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// Receiver for observing state transitions.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Sever the connection and suppress all further reconnection.
    ///
    /// Idempotent and safe from any state: cancels pending backoff
    /// sleeps, closes the live socket, and settles on `Disconnected`.
    pub fn disconnect(&self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.state_tx.send(ConnectionState::Disconnected);
    }
}

fn set_state(
    state_tx: &watch::Sender<ConnectionState>,
    shutdown_rx: &watch::Receiver<bool>,
    state: ConnectionState,
) {
    // After an intentional disconnect the state is pinned.
    if *shutdown_rx.borrow() {
        return;
    }
    let _ = state_tx.send(state);
}

fn jitter() -> f64 {
    rand::rng().random_range(0.5..=1.5)
}

/// Build the attach URL, carrying the replay cursor whenever one exists
/// so reconnection after any cause resumes without gaps.
fn build_stream_url(
    config: &StreamClientConfig,
    ticket: Option<&str>,
    last_event_id: Option<u64>,
) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(&config.server_url)?.join("/stream")?;
    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("session_id", &config.session_id.to_string());
        if let Some(id) = last_event_id {
            pairs.append_pair("from_id", &id.to_string());
        }
        if let Some(execution_id) = config.execution_id {
            pairs.append_pair("execution_ids", &execution_id.to_string());
        }
        if let Some(ticket) = ticket {
            pairs.append_pair("ticket", ticket);
        }
    }
    Ok(url)
}

enum SocketEnd {
    /// Intentional disconnect or an abandoned event channel.
    Finished,
    /// The socket closed on its own; classify and maybe reconnect.
    Closed(CloseInfo),
}

async fn run_driver(
    config: StreamClientConfig,
    tickets: Arc<dyn TicketProvider>,
    detector: Arc<dyn AuthFailureDetector>,
    state_tx: watch::Sender<ConnectionState>,
    mut shutdown_rx: watch::Receiver<bool>,
    events_tx: mpsc::UnboundedSender<StreamEvent>,
) {
    let mut attempt: u32 = 0;
    let mut last_event_id: Option<u64> = None;
    let mut ticket = config.ticket.clone();
    let mut refreshed_ticket = false;

    loop {
        set_state(&state_tx, &shutdown_rx, ConnectionState::Connecting);

        let url = match build_stream_url(&config, ticket.as_deref(), last_event_id) {
            Ok(url) => url,
            Err(e) => {
                set_state(
                    &state_tx,
                    &shutdown_rx,
                    ConnectionState::Error {
                        message: format!("invalid server url: {e}"),
                        retryable: false,
                    },
                );
                return;
            }
        };

        // The previous socket was dropped before this point, so a stale
        // close can never reach this state machine.
        let connected = tokio::select! {
            result = connect_async(url.as_str()) => result,
            _ = shutdown_rx.changed() => {
                let _ = state_tx.send(ConnectionState::Disconnected);
                return;
            }
        };

        let mut received_any = false;
        let close = match connected {
            Ok((socket, _response)) => {
                set_state(
                    &state_tx,
                    &shutdown_rx,
                    ConnectionState::Connected {
                        execution_id: config.execution_id,
                    },
                );
                match run_socket(
                    socket,
                    &events_tx,
                    &mut last_event_id,
                    &mut received_any,
                    &mut shutdown_rx,
                )
                .await
                {
                    SocketEnd::Finished => {
                        let _ = state_tx.send(ConnectionState::Disconnected);
                        return;
                    }
                    SocketEnd::Closed(info) => info,
                }
            }
            Err(e) => CloseInfo::from_error(e.to_string()),
        };

        tracing::debug!(code = ?close.code, reason = %close.reason, "stream connection closed");

        // A demonstrably healthy connection ends the previous failure
        // streak and any auth-refresh cycle.
        if received_any {
            attempt = 0;
            refreshed_ticket = false;
        }

        if detector.is_auth_failure(&close) {
            if refreshed_ticket {
                set_state(
                    &state_tx,
                    &shutdown_rx,
                    ConnectionState::Error {
                        message: "auth failure after ticket refresh".into(),
                        retryable: false,
                    },
                );
                return;
            }

            set_state(&state_tx, &shutdown_rx, ConnectionState::RefreshingTicket);
            let refreshed = tokio::select! {
                result = tickets.refresh_ticket() => result,
                _ = shutdown_rx.changed() => {
                    let _ = state_tx.send(ConnectionState::Disconnected);
                    return;
                }
            };
            match refreshed {
                Ok(fresh) => {
                    ticket = Some(fresh);
                    refreshed_ticket = true;
                    attempt = 0;
                    continue;
                }
                Err(e) => {
                    set_state(
                        &state_tx,
                        &shutdown_rx,
                        ConnectionState::Error {
                            message: e.to_string(),
                            retryable: false,
                        },
                    );
                    return;
                }
            }
        }

        attempt += 1;
        if config.policy.exhausted(attempt) {
            set_state(
                &state_tx,
                &shutdown_rx,
                ConnectionState::Error {
                    message: format!("reconnect budget exhausted after {attempt} attempts"),
                    retryable: false,
                },
            );
            return;
        }

        set_state(
            &state_tx,
            &shutdown_rx,
            ConnectionState::Reconnecting {
                last_event_id,
                attempt,
            },
        );
        let delay = config.policy.delay(attempt - 1, jitter());
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            _ = shutdown_rx.changed() => {
                let _ = state_tx.send(ConnectionState::Disconnected);
                return;
            }
        }
    }
}

/// Pump one socket until it closes, advancing the replay cursor on every
/// received event.
async fn run_socket(
    socket: WsStream,
    events_tx: &mpsc::UnboundedSender<StreamEvent>,
    last_event_id: &mut Option<u64>,
    received_any: &mut bool,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> SocketEnd {
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                let _ = sink.send(Message::Close(None)).await;
                return SocketEnd::Finished;
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<StreamEvent>(&text) {
                    Ok(event) => {
                        *last_event_id = Some(event.event_id);
                        *received_any = true;
                        if events_tx.send(event).is_err() {
                            // Nobody is observing anymore.
                            let _ = sink.send(Message::Close(None)).await;
                            return SocketEnd::Finished;
                        }
                    }
                    Err(e) => tracing::warn!("unparseable stream frame: {e}"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let info = frame.map_or_else(CloseInfo::default, |f| CloseInfo {
                        code: Some(u16::from(f.code)),
                        reason: f.reason.to_string(),
                    });
                    return SocketEnd::Closed(info);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return SocketEnd::Closed(CloseInfo::from_error(e.to_string())),
                None => return SocketEnd::Closed(CloseInfo::from_error("connection lost")),
            }
        }
    }
}
