//! WebSocket attach and ingest endpoints.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use exec_relay_core::{
    CloseCode, EventFilter, IngestEvent, SessionId, StreamEvent, StreamEventType,
};
use exec_relay_session::AcquireOutcome;

use crate::{
    http,
    protocol::{IngestParams, StreamParams},
    state::RelayState,
};

/// Stream attach handler.
///
/// Unknown sessions and malformed parameters are rejected before the
/// upgrade; everything after the upgrade speaks WebSocket close codes.
pub async fn stream_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<StreamParams>,
    State(state): State<Arc<RelayState>>,
) -> impl IntoResponse {
    if !state.store.session_exists(params.session_id) {
        return (StatusCode::NOT_FOUND, CloseCode::SessionNotFound.reason()).into_response();
    }
    let filter = match params.filter() {
        Ok(filter) => filter,
        Err(e) => {
            tracing::warn!("rejecting stream attach: {e}");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    let session_id = params.session_id;
    ws.on_upgrade(move |socket| stream_socket(socket, state, session_id, filter))
        .into_response()
}

/// Replay buffered events past the cursor, then forward live events that
/// match the subscription filter.
async fn stream_socket(
    socket: WebSocket,
    state: Arc<RelayState>,
    session_id: SessionId,
    filter: EventFilter,
) {
    let (mut sender, mut receiver) = socket.split();

    // Snapshot and live receiver come from one lock acquisition, so no
    // event is dropped or duplicated between replay and live.
    let (replay, live_rx) = match state.store.subscribe(session_id, &filter) {
        Ok(subscription) => subscription,
        Err(e) => {
            tracing::error!(%session_id, "stream subscribe failed: {e}");
            let _ = sender.send(close_message(CloseCode::InternalError)).await;
            return;
        }
    };

    // Channel for sending frames to the client.
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    for event in &replay {
        if send_event(&tx, event).is_err() {
            break;
        }
    }

    let relay_tx = tx.clone();
    let relay_filter = filter;
    let relay_task = tokio::spawn(async move {
        let mut live_rx = live_rx;
        loop {
            match live_rx.recv().await {
                Ok(event) => {
                    // Live matching never consults the replay cursor.
                    if relay_filter.matches(&event) && send_event(&relay_tx, &event).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        %session_id,
                        skipped,
                        "subscriber lagged; closing so the client resumes via replay"
                    );
                    let _ = relay_tx.send(close_message(CloseCode::InternalError));
                    break;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // The stream is one-way; only Close matters from the client.
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(%session_id, "stream socket error: {e}");
                break;
            }
        }
    }

    relay_task.abort();
    send_task.abort();
}

fn send_event(
    tx: &mpsc::UnboundedSender<Message>,
    event: &StreamEvent,
) -> Result<(), mpsc::error::SendError<Message>> {
    match serde_json::to_string(event) {
        Ok(json) => tx.send(Message::Text(json.into())),
        Err(e) => {
            tracing::error!("failed to serialize event: {e}");
            Ok(())
        }
    }
}

/// Ingest handler: the executor's push channel.
pub async fn ingest_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<IngestParams>,
    State(state): State<Arc<RelayState>>,
) -> impl IntoResponse {
    if !state.store.session_exists(params.session_id) {
        return (StatusCode::NOT_FOUND, CloseCode::SessionNotFound.reason()).into_response();
    }
    ws.on_upgrade(move |socket| ingest_socket(socket, state, params))
        .into_response()
}

async fn ingest_socket(mut socket: WebSocket, state: Arc<RelayState>, params: IngestParams) {
    if !state.try_claim_ingest(params.execution_id) {
        let _ = socket.send(close_message(CloseCode::DuplicateIngest)).await;
        return;
    }

    // The lease is the arbiter of who may run; a conflict means another
    // execution is still live for this session.
    if let AcquireOutcome::Conflict { current_owner } =
        state.leases.acquire(params.session_id, params.execution_id)
    {
        tracing::warn!(
            session_id = %params.session_id,
            execution_id = %params.execution_id,
            %current_owner,
            "ingest refused: session lease held elsewhere"
        );
        state.release_ingest(params.execution_id);
        let _ = socket.send(close_message(CloseCode::DuplicateIngest)).await;
        return;
    }

    let mut saw_terminal = false;
    while let Some(msg) = socket.recv().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(execution_id = %params.execution_id, "ingest socket error: {e}");
                break;
            }
        };

        let ingest: IngestEvent = match serde_json::from_str(&text) {
            Ok(ingest) => ingest,
            Err(e) => {
                tracing::warn!("invalid ingest frame: {e}");
                let _ = socket.send(close_message(CloseCode::ProtocolError)).await;
                break;
            }
        };

        if ingest.event_type.is_terminal() {
            saw_terminal = true;
        }

        if let Err(e) = state
            .store
            .append(params.session_id, params.execution_id, ingest)
        {
            tracing::error!(session_id = %params.session_id, "ingest append failed: {e}");
            let _ = socket.send(close_message(CloseCode::InternalError)).await;
            break;
        }
    }

    // The executor vanished without a lifecycle transition: record the
    // interruption so observers see a terminal event.
    if !saw_terminal {
        let _ = state.store.append(
            params.session_id,
            params.execution_id,
            IngestEvent::new(
                StreamEventType::ExecutionInterrupted,
                json!({ "reason": "ingest connection lost" }),
            ),
        );
    }

    state.leases.release(params.session_id, params.execution_id);
    state.release_ingest(params.execution_id);
}

fn close_message(code: CloseCode) -> Message {
    Message::Close(Some(CloseFrame {
        code: code.code(),
        reason: code.reason().into(),
    }))
}

/// Create the relay router.
///
/// # Example
/// ```ignore
/// let app = create_router(Arc::new(RelayState::new(store, leases)));
/// ```
#[must_use]
pub fn create_router(state: Arc<RelayState>) -> axum::Router {
    axum::Router::new()
        .route("/stream", axum::routing::get(stream_handler))
        .route("/ingest", axum::routing::get(ingest_handler))
        .route("/sessions", axum::routing::post(http::create_session_handler))
        .route(
            "/sessions/{session_id}/status",
            axum::routing::get(http::status_handler),
        )
        .route(
            "/sessions/{session_id}/jobs",
            axum::routing::post(http::start_job_handler),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
