//! HTTP API for display surfaces and other collaborators
//!
//! This module exposes the session over a small REST API:
//! - GET /session - Current session snapshot
//! - GET /session/messages - Conversation log
//! - POST /session/connect - Start a fresh session
//! - POST /session/disconnect - Stop the session
//! - POST /session/text - Send typed text
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
