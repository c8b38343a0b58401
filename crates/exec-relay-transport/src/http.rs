//! JSON control surface for polling clients not on the WebSocket path.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use exec_relay_core::{ExecutionId, SessionId};
use exec_relay_session::{AcquireOutcome, JobContext};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::RelayState;

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: SessionId,
}

#[derive(Debug, Deserialize)]
pub struct StartJobRequest {
    pub execution_id: ExecutionId,
    pub user_id: String,
    #[serde(default)]
    pub remote_session_id: Option<String>,
    pub ingest_url: String,
    pub ingest_token: String,
    pub auth_token: String,
}

#[derive(Debug, Serialize)]
pub struct StartJobResponse {
    pub execution_id: ExecutionId,
    pub lease_expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

fn error_body(message: impl Into<String>) -> Json<ErrorBody> {
    Json(ErrorBody {
        error: message.into(),
    })
}

/// `POST /sessions` — register a session and its event log.
pub async fn create_session_handler(State(state): State<Arc<RelayState>>) -> impl IntoResponse {
    let session_id = Uuid::new_v4();
    state.store.create_session(session_id);
    tracing::info!(%session_id, "session created");
    (StatusCode::CREATED, Json(CreateSessionResponse { session_id }))
}

/// `GET /sessions/{id}/status` — job state for polling clients.
pub async fn status_handler(
    Path(session_id): Path<SessionId>,
    State(state): State<Arc<RelayState>>,
) -> impl IntoResponse {
    if !state.store.session_exists(session_id) {
        return (StatusCode::NOT_FOUND, error_body("session_not_found")).into_response();
    }
    Json(state.tracker(session_id).status()).into_response()
}

/// `POST /sessions/{id}/jobs` — request an execution slot and install the
/// job context. Conflicts are 409s naming the current holder.
pub async fn start_job_handler(
    Path(session_id): Path<SessionId>,
    State(state): State<Arc<RelayState>>,
    Json(req): Json<StartJobRequest>,
) -> impl IntoResponse {
    if !state.store.session_exists(session_id) {
        return (StatusCode::NOT_FOUND, error_body("session_not_found")).into_response();
    }

    let lease = match state.leases.acquire(session_id, req.execution_id) {
        AcquireOutcome::Conflict { current_owner } => {
            return (
                StatusCode::CONFLICT,
                error_body(format!("execution {current_owner} holds the session lease")),
            )
                .into_response();
        }
        AcquireOutcome::Granted(lease) => lease,
    };

    let ctx = JobContext {
        execution_id: req.execution_id,
        session_id,
        user_id: req.user_id,
        remote_session_id: req.remote_session_id,
        ingest_url: req.ingest_url,
        ingest_token: req.ingest_token,
        auth_token: req.auth_token,
    };

    if let Err(e) = state.tracker(session_id).start_job(ctx) {
        // The previous job still has prompts inflight; hand the slot back.
        state.leases.release(session_id, req.execution_id);
        return (StatusCode::CONFLICT, error_body(e.to_string())).into_response();
    }

    (
        StatusCode::CREATED,
        Json(StartJobResponse {
            execution_id: req.execution_id,
            lease_expires_at: lease.expires_at,
        }),
    )
        .into_response()
}
