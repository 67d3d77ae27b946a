use super::state::AppState;
use crate::session::{SessionInfo, SessionStatus};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct DisconnectRequest {
    /// Graceful unless stated otherwise
    #[serde(default = "default_graceful")]
    pub graceful: bool,
}

fn default_graceful() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct SendTextRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct SendTextResponse {
    pub sent: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> axum::response::Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /session
/// Current session snapshot
pub async fn get_session(State(state): State<AppState>) -> Json<SessionInfo> {
    Json(state.controller.info())
}

/// GET /session/messages
/// Conversation log so far
pub async fn get_messages(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.controller.messages()))
}

/// POST /session/connect
/// Start a fresh session
pub async fn connect(State(state): State<AppState>) -> impl IntoResponse {
    info!("Connect requested over HTTP");

    match state.controller.connect().await {
        Ok(()) => (StatusCode::ACCEPTED, Json(state.controller.info())).into_response(),
        Err(e) => {
            error!("Failed to connect: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// POST /session/disconnect
/// Stop the session; body is optional
pub async fn disconnect(
    State(state): State<AppState>,
    body: Option<Json<DisconnectRequest>>,
) -> impl IntoResponse {
    let graceful = body.map(|Json(req)| req.graceful).unwrap_or(true);
    info!("Disconnect requested over HTTP (graceful={})", graceful);

    match state.controller.disconnect(graceful).await {
        Ok(()) => (StatusCode::OK, Json(state.controller.info())).into_response(),
        Err(e) => {
            error!("Failed to disconnect: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// POST /session/text
/// Send typed text as a user turn
pub async fn send_text(
    State(state): State<AppState>,
    Json(req): Json<SendTextRequest>,
) -> impl IntoResponse {
    if req.text.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "text must not be empty");
    }

    let status = state.controller.info().status;
    if status != SessionStatus::Connected {
        return error_response(
            StatusCode::CONFLICT,
            format!("Session is {}, not connected", status),
        );
    }

    match state.controller.send_text(req.text).await {
        Ok(true) => (StatusCode::OK, Json(SendTextResponse { sent: true })).into_response(),
        Ok(false) => error_response(StatusCode::CONFLICT, "Session is not connected"),
        Err(e) => {
            error!("Failed to send text: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
