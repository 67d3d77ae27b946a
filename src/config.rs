use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::audio::{CaptureConfig, PlaybackConfig};
use crate::session::{ReconnectPolicy, SessionConfig};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub agent: AgentConfig,
    pub audio: AudioConfig,
    pub reconnect: ReconnectPolicy,
    pub transcript: TranscriptConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub enabled: bool,
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent base URL (http/https)
    pub endpoint: String,
    pub client_label: String,
    pub auth_token: Option<String>,
    pub termination_notice: bool,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub capture_sample_rate: u32,
    pub frame_samples: usize,
    pub capture_channel_capacity: usize,
    pub playback_sample_rate: u32,
    pub buffer_samples: usize,
    pub initial_buffer_ms: u64,
    pub look_ahead_ms: u64,
    pub poll_interval_ms: u64,
    pub stop_ramp_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TranscriptConfig {
    pub batch_interval_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "loqa-live".to_string(),
            http: HttpConfig::default(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "127.0.0.1".to_string(),
            port: 3030,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080".to_string(),
            client_label: "aiVoice".to_string(),
            auth_token: None,
            termination_notice: true,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        let capture = CaptureConfig::default();
        let playback = PlaybackConfig::default();
        Self {
            capture_sample_rate: capture.sample_rate,
            frame_samples: capture.frame_samples,
            capture_channel_capacity: capture.channel_capacity,
            playback_sample_rate: 24000,
            buffer_samples: playback.buffer_samples,
            initial_buffer_ms: playback.initial_buffer.as_millis() as u64,
            look_ahead_ms: playback.look_ahead.as_millis() as u64,
            poll_interval_ms: playback.poll_interval.as_millis() as u64,
            stop_ramp_ms: playback.stop_ramp.as_millis() as u64,
        }
    }
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            batch_interval_ms: 16,
        }
    }
}

impl Config {
    /// Load `path` (extension optional) layered under `LOQA_LIVE__*` variables
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("LOQA_LIVE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read config from {}", path))?;

        settings
            .try_deserialize()
            .with_context(|| format!("Invalid config in {}", path))
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            sample_rate: self.audio.capture_sample_rate,
            frame_samples: self.audio.frame_samples,
            channel_capacity: self.audio.capture_channel_capacity,
        }
    }

    pub fn playback_config(&self) -> PlaybackConfig {
        PlaybackConfig {
            buffer_samples: self.audio.buffer_samples,
            initial_buffer: Duration::from_millis(self.audio.initial_buffer_ms),
            look_ahead: Duration::from_millis(self.audio.look_ahead_ms),
            poll_interval: Duration::from_millis(self.audio.poll_interval_ms),
            stop_ramp: Duration::from_millis(self.audio.stop_ramp_ms),
        }
    }

    /// Runtime configuration for the session controller
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            endpoint: self.agent.endpoint.clone(),
            client_label: self.agent.client_label.clone(),
            auth_token: self.agent.auth_token.clone(),
            reconnect: self.reconnect.clone(),
            playback: self.playback_config(),
            capture: self.capture_config(),
            batch_interval: Duration::from_millis(self.transcript.batch_interval_ms),
            termination_notice: self.agent.termination_notice,
        }
    }
}
