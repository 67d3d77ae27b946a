use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    /// Retries exhausted
    Error,
}

impl SessionStatus {
    /// The session is still wanted, whether or not a transport is open
    pub fn is_live(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected | Self::Reconnecting)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Snapshot of the session, published on every change
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Identifier of the current logical session, if one was ever started
    pub session_id: Option<String>,

    pub status: SessionStatus,

    /// When the logical session started (kept across reconnects)
    pub started_at: Option<DateTime<Utc>>,

    /// Waiting for the agent to respond
    pub thinking: bool,

    /// Connected, but the microphone could not be started
    pub audio_degraded: bool,

    /// Reconnect attempts made since the last successful open
    pub reconnect_attempt: u32,
}
