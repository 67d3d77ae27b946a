use anyhow::{Context, Result};
use base64::Engine;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::audio::AudioFrame;
use crate::transcript::{LinkTarget, TranscriptEvent};

/// Envelope sent to the agent: `{"type": ..., "payload": ...}`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
    ClientContent(ClientContent),
    ToolResponse(Value),
}

/// Initial handshake; the agent resolves its own configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Setup {}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RealtimeInput {
    pub audio: MediaBlob,
}

/// Base64 media chunk
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaBlob {
    pub data: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientContent {
    pub turns: Vec<ClientTurn>,
    #[serde(rename = "turnComplete")]
    pub turn_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientTurn {
    pub role: String,
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextPart {
    pub text: String,
}

impl ClientMessage {
    pub fn setup() -> Self {
        Self::Setup(Setup::default())
    }

    /// Microphone frame as `audio/pcm;rate=<rate>`
    pub fn audio(frame: &AudioFrame) -> Self {
        Self::RealtimeInput(RealtimeInput {
            audio: MediaBlob {
                data: base64::engine::general_purpose::STANDARD.encode(frame.to_pcm_bytes()),
                mime_type: format!("audio/pcm;rate={}", frame.sample_rate),
            },
        })
    }

    /// A complete user turn carrying typed text
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::ClientContent(ClientContent {
            turns: vec![ClientTurn {
                role: "user".to_string(),
                parts: vec![TextPart { text: text.into() }],
            }],
            turn_complete: true,
        })
    }

    pub fn tool_response(payload: Value) -> Self {
        Self::ToolResponse(payload)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize client message")
    }
}

/// Inbound message, resolved once at the boundary
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// The agent ended the session
    SessionTerminated,
    LinkBubble(LinkTarget),
    Content(ServerContent),
}

impl ServerMessage {
    /// Parse one text frame.
    ///
    /// Only non-JSON input is an error. Unknown or mistyped fields are
    /// skipped one by one so a single odd field never costs the rest.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text).context("Inbound frame is not JSON")?;

        if message_type(&value) == Some("session_terminated") {
            return Ok(Self::SessionTerminated);
        }

        let content = value
            .get("server_content")
            .or_else(|| value.get("serverContent"))
            .unwrap_or(&value);

        if message_type(content) == Some("link_bubble") {
            let link = content
                .get("payload")
                .cloned()
                .and_then(|payload| serde_json::from_value::<LinkTarget>(payload).ok());
            return Ok(match link {
                Some(link) => Self::LinkBubble(link),
                None => {
                    warn!("Dropping link bubble without url/alias");
                    Self::Content(ServerContent::default())
                }
            });
        }

        Ok(Self::Content(ServerContent::from_value(content)))
    }
}

fn message_type(value: &Value) -> Option<&str> {
    value.get("type").and_then(Value::as_str)
}

/// First non-null value among the spellings of one field
fn field<'a>(value: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .filter_map(|name| value.get(*name))
        .find(|v| !v.is_null())
}

fn string_field(value: &Value, names: &[&str]) -> Option<String> {
    field(value, names).and_then(Value::as_str).map(str::to_string)
}

/// Loose flag: `true`, a non-zero number or a non-empty string
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Server content. Field names are accepted in snake_case and camelCase.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerContent {
    pub model_turn: Option<ModelTurn>,
    pub output_transcription: Option<Transcription>,
    pub input_transcription: Option<Transcription>,
    pub turn_complete: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelTurn {
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Part {
    pub text: Option<String>,
    pub content: Option<String>,
    pub thought: Option<bool>,
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InlineData {
    pub data: Option<String>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcription {
    pub text: Option<String>,
}

impl ServerContent {
    /// Read each field on its own. A field of the wrong shape is treated as
    /// absent without affecting its neighbours.
    pub fn from_value(value: &Value) -> Self {
        let content = Self {
            model_turn: field(value, &["model_turn", "modelTurn"]).and_then(ModelTurn::from_value),
            output_transcription: field(value, &["output_transcription", "outputTranscription"])
                .and_then(Transcription::from_value),
            input_transcription: field(
                value,
                &[
                    "input_transcription",
                    "inputTranscription",
                    "input_audio_transcription",
                    "inputAudioTranscription",
                ],
            )
            .and_then(Transcription::from_value),
            turn_complete: field(value, &["turn_complete", "turnComplete"]).map(truthy),
        };

        if value.is_object() && content == Self::default() {
            debug!("Server content carried no recognised fields");
        }

        content
    }
}

impl ModelTurn {
    fn from_value(value: &Value) -> Option<Self> {
        if !value.is_object() {
            warn!("Skipping model turn that is not an object");
            return None;
        }
        let parts = value
            .get("parts")
            .and_then(Value::as_array)
            .map(|parts| parts.iter().filter_map(Part::from_value).collect())
            .unwrap_or_default();
        Some(Self { parts })
    }
}

impl Part {
    fn from_value(value: &Value) -> Option<Self> {
        if !value.is_object() {
            return None;
        }
        Some(Self {
            text: string_field(value, &["text"]),
            content: string_field(value, &["content"]),
            thought: field(value, &["thought"]).map(truthy),
            inline_data: field(value, &["inline_data", "inlineData"]).and_then(InlineData::from_value),
        })
    }
}

impl InlineData {
    fn from_value(value: &Value) -> Option<Self> {
        value.is_object().then(|| Self {
            data: string_field(value, &["data"]),
            mime_type: string_field(value, &["mime_type", "mimeType"]),
        })
    }
}

impl Transcription {
    fn from_value(value: &Value) -> Option<Self> {
        value.is_object().then(|| Self {
            text: string_field(value, &["text"]),
        })
    }
}

impl Part {
    fn visible_text(&self) -> Option<&str> {
        if self.thought.unwrap_or(false) {
            return None;
        }
        self.text
            .as_deref()
            .filter(|t| !t.is_empty())
            .or_else(|| self.content.as_deref().filter(|t| !t.is_empty()))
    }
}

impl ServerContent {
    /// Base64 audio payloads carried by the model turn, in order
    pub fn audio_payloads(&self) -> impl Iterator<Item = &str> {
        self.model_turn
            .iter()
            .flat_map(|turn| turn.parts.iter())
            .filter_map(|part| part.inline_data.as_ref()?.data.as_deref())
            .filter(|data| !data.is_empty())
    }

    /// Whether the agent produced anything in this message
    pub fn has_agent_activity(&self) -> bool {
        self.model_turn.is_some() || self.output_transcription.is_some()
    }

    pub fn is_turn_complete(&self) -> bool {
        self.turn_complete.unwrap_or(false)
    }

    /// Transcript events carried by this message, in processing order.
    ///
    /// Agent text comes from the model turn; the output transcription is used
    /// only when the model turn has no visible text.
    pub fn transcript_events(&self) -> Vec<TranscriptEvent> {
        let mut events = Vec::new();

        let model_text: String = self
            .model_turn
            .iter()
            .flat_map(|turn| turn.parts.iter())
            .filter_map(Part::visible_text)
            .collect();

        if !model_text.is_empty() {
            events.push(TranscriptEvent::AgentText(model_text));
        } else if let Some(text) = transcription_text(&self.output_transcription) {
            events.push(TranscriptEvent::AgentTranscription(text.to_string()));
        }

        if let Some(text) = transcription_text(&self.input_transcription) {
            events.push(TranscriptEvent::UserText(text.to_string()));
        }

        if self.is_turn_complete() {
            events.push(TranscriptEvent::TurnComplete);
        }

        events
    }
}

fn transcription_text(transcription: &Option<Transcription>) -> Option<&str> {
    transcription
        .as_ref()?
        .text
        .as_deref()
        .filter(|t| !t.is_empty())
}

/// Decode a base64 audio payload into PCM bytes
pub fn decode_audio_payload(data: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(data)
        .context("Invalid base64 audio payload")
}
