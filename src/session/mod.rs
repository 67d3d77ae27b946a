//! Live session management
//!
//! This module provides the `SessionController` that owns:
//! - The connect/reconnect lifecycle and its backoff policy
//! - Forwarding microphone frames while connected
//! - Routing inbound audio to playback and transcripts to the batcher
//! - Deferred close when the agent ends the session mid-sentence
//! - The published `SessionInfo` snapshot

mod backoff;
mod config;
mod controller;
mod status;

pub use backoff::ReconnectPolicy;
pub use config::SessionConfig;
pub use controller::{SessionController, SessionDeps, NOTICE_GRACE};
pub use status::{SessionInfo, SessionStatus};
