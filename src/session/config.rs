use anyhow::{Context, Result};
use reqwest::Url;
use std::time::Duration;

use super::backoff::ReconnectPolicy;
use crate::audio::{CaptureConfig, PlaybackConfig};

/// Runtime configuration for a session controller
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Agent base URL (http or https; the socket scheme is derived from it)
    pub endpoint: String,

    /// Client label embedded in the socket URL
    pub client_label: String,

    /// Login-derived bearer credential
    pub auth_token: Option<String>,

    pub reconnect: ReconnectPolicy,

    pub playback: PlaybackConfig,

    pub capture: CaptureConfig,

    /// Delay between transcript consolidation passes
    pub batch_interval: Duration,

    /// Send the termination notice on process teardown
    pub termination_notice: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080".to_string(),
            client_label: "aiVoice".to_string(),
            auth_token: None,
            reconnect: ReconnectPolicy::default(),
            playback: PlaybackConfig::default(),
            capture: CaptureConfig::default(),
            batch_interval: Duration::from_millis(16), // about one display frame
            termination_notice: true,
        }
    }
}

impl SessionConfig {
    /// `{endpoint as ws}/ws?callId={id}&client={label}`, query values encoded
    pub fn socket_url(&self, session_id: &str) -> Result<String> {
        let base = self.endpoint.trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };

        let mut url = Url::parse(&format!("{}/ws", base))
            .with_context(|| format!("Invalid agent endpoint: {}", self.endpoint))?;
        url.query_pairs_mut()
            .append_pair("callId", session_id)
            .append_pair("client", &self.client_label);

        Ok(url.into())
    }
}
