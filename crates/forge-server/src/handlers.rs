//! HTTP handlers: the chat event stream and the session maintenance endpoints.

use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::Json;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{info, warn};

use forge_core::events::ConnectionEvent;
use forge_core::ids::SessionId;
use forge_engine::{RecordingSink, ReplayOutcome};

use crate::error::ApiError;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub prompt: String,
    #[serde(default)]
    pub session_id: Option<SessionId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    pub session_id: SessionId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetResponse {
    pub success: bool,
    pub session_id: SessionId,
}

#[derive(Debug, Serialize)]
pub struct ReplayResponse {
    pub success: bool,
    #[serde(flatten)]
    pub outcome: ReplayOutcome,
    pub events: Vec<ConnectionEvent>,
}

/// `POST /api/chat`: stream the exchange as server-sent events, one SSE
/// event per connection event, named by its kind.
pub async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    if req.prompt.trim().is_empty() {
        return Err(ApiError::BadRequest("prompt is required".into()));
    }
    if let Some(id) = &req.session_id {
        check_session_id(id)?;
    }

    let rx = state.supervisor.open(req.prompt, req.session_id);
    let stream = UnboundedReceiverStream::new(rx).map(|event| Ok(to_sse(&event)));
    Ok(Sse::new(stream))
}

fn check_session_id(id: &SessionId) -> Result<(), ApiError> {
    if id.is_well_formed() {
        Ok(())
    } else {
        Err(ApiError::BadRequest(format!(
            "sessionId must match [A-Za-z0-9_-]{{1,{}}}",
            forge_core::ids::MAX_ID_LEN
        )))
    }
}

fn to_sse(event: &ConnectionEvent) -> Event {
    Event::default()
        .event(event.kind())
        .json_data(event)
        .unwrap_or_else(|e| {
            warn!(error = %e, kind = event.kind(), "failed to encode event");
            Event::default().event("error").data(r#"{"type":"error","message":"encoding failed","terminal":false}"#)
        })
}

/// `POST /api/session/reset`
pub async fn reset_session(
    State(state): State<AppState>,
    Json(req): Json<SessionRequest>,
) -> Result<Json<ResetResponse>, ApiError> {
    check_session_id(&req.session_id)?;
    state.sessions.reset(&req.session_id)?;
    info!(session_id = %req.session_id, "session reset");
    Ok(Json(ResetResponse {
        success: true,
        session_id: req.session_id,
    }))
}

/// `POST /api/session/replay`: re-run the session's last failed tool call.
pub async fn replay_session(
    State(state): State<AppState>,
    Json(req): Json<SessionRequest>,
) -> Result<Json<ReplayResponse>, ApiError> {
    check_session_id(&req.session_id)?;
    let sink = RecordingSink::new();
    let outcome = state
        .supervisor
        .runner()
        .replay_last_failed(&req.session_id, &sink)
        .await?;
    Ok(Json(ReplayResponse {
        success: outcome.success(),
        outcome,
        events: sink.into_events(),
    }))
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "sessions": state.sessions.len(),
    }))
}
