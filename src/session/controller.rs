use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Sleep};
use tracing::{debug, info, warn};

use super::config::SessionConfig;
use super::status::{SessionInfo, SessionStatus};
use crate::audio::{AudioCapture, AudioFrame, AudioOutput, PlaybackScheduler, PlaybackStatus};
use crate::transcript::{
    Message, MessageKind, MessageStore, PassState, Role, TranscriptBatcher, TranscriptEvent,
};
use crate::transport::{
    decode_audio_payload, ClientMessage, Connector, LinkSender, ServerMessage, TerminationBeacon,
    TransportEvent, TransportLink, ABNORMAL_CLOSE, NORMAL_CLOSE,
};

/// How long shutdown lets the termination notice run after disconnecting
pub const NOTICE_GRACE: Duration = Duration::from_millis(500);

/// Hardware and network seams a controller is built on
pub struct SessionDeps {
    pub connector: Arc<dyn Connector>,
    pub capture: Box<dyn AudioCapture>,
    pub output: Arc<dyn AudioOutput>,
}

enum Command {
    Connect {
        reply: oneshot::Sender<()>,
    },
    Disconnect {
        graceful: bool,
        reply: oneshot::Sender<()>,
    },
    SendText {
        text: String,
        reply: oneshot::Sender<bool>,
    },
    SendToolResponse {
        payload: Value,
        reply: oneshot::Sender<bool>,
    },
}

/// Handle to a live voice session.
///
/// The session itself runs as a single task that exclusively owns the
/// transport, the capture device, the playback scheduler and the transcript
/// batcher. This handle only sends it commands and reads the published
/// [`SessionInfo`] and the message log. Dropping every handle tears the
/// session down.
pub struct SessionController {
    commands: mpsc::UnboundedSender<Command>,
    info: watch::Receiver<SessionInfo>,
    store: MessageStore,
    beacon: Option<TerminationBeacon>,
    task: JoinHandle<()>,
}

impl SessionController {
    /// Start the session task. Must be called from within a tokio runtime.
    pub fn spawn(config: SessionConfig, deps: SessionDeps) -> Result<Self> {
        let beacon = if config.termination_notice {
            Some(TerminationBeacon::new(&config.endpoint)?)
        } else {
            None
        };

        let store = MessageStore::new();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (info_tx, info_rx) = watch::channel(SessionInfo::default());
        let (drained_tx, drained_rx) = mpsc::unbounded_channel();

        let actor = SessionActor {
            playback: PlaybackScheduler::new(deps.output, config.playback.clone()),
            batcher: TranscriptBatcher::new(store.clone()),
            store: store.clone(),
            connector: deps.connector,
            capture: deps.capture,
            config,
            commands: command_rx,
            info_tx,
            drained_tx,
            drained_rx,
            session_id: None,
            started_at: None,
            status: SessionStatus::Idle,
            live: false,
            attempt: 0,
            thinking: false,
            audio_degraded: false,
            link: None,
            events: None,
            frames: None,
            pending_open: None,
            reconnect_timer: None,
            batch_timer: None,
        };

        let task = tokio::spawn(actor.run());

        Ok(Self {
            commands: command_tx,
            info: info_rx,
            store,
            beacon,
            task,
        })
    }

    /// Start a fresh logical session: new identifier, empty log, retry
    /// counter reset. Any current session is dropped first.
    pub async fn connect(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Connect { reply })?;
        rx.await.map_err(|_| anyhow!("Session task stopped"))
    }

    /// Stop the session. Idempotent; cancels any pending reconnect.
    pub async fn disconnect(&self, graceful: bool) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Disconnect { graceful, reply })?;
        rx.await.map_err(|_| anyhow!("Session task stopped"))
    }

    /// Send typed text as a user turn. Returns false unless connected.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::SendText {
            text: text.into(),
            reply,
        })?;
        rx.await.map_err(|_| anyhow!("Session task stopped"))
    }

    /// Forward a tool response. Returns false unless connected.
    pub async fn send_tool_response(&self, payload: Value) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::SendToolResponse { payload, reply })?;
        rx.await.map_err(|_| anyhow!("Session task stopped"))
    }

    pub fn info(&self) -> SessionInfo {
        self.info.borrow().clone()
    }

    /// Receiver that observes every published [`SessionInfo`]
    pub fn subscribe(&self) -> watch::Receiver<SessionInfo> {
        self.info.clone()
    }

    /// Snapshot of the conversation log
    pub fn messages(&self) -> Vec<Message> {
        self.store.snapshot()
    }

    /// Shared handle to the conversation log
    pub fn store(&self) -> MessageStore {
        self.store.clone()
    }

    /// Process teardown: fire the termination notice if a session is live,
    /// then force a disconnect. The notice gets at most [`NOTICE_GRACE`] after
    /// the disconnect to leave before this returns.
    pub async fn shutdown(&self) -> Result<()> {
        let info = self.info();
        let notice = match (&self.beacon, &info.session_id) {
            (Some(beacon), Some(session_id)) if info.status.is_live() => {
                Some(beacon.fire(session_id))
            }
            _ => None,
        };

        let result = self.disconnect(false).await;

        if let Some(notice) = notice {
            if tokio::time::timeout(NOTICE_GRACE, notice).await.is_err() {
                debug!("Termination notice still in flight at shutdown");
            }
        }

        result
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    fn request(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| anyhow!("Session task stopped"))
    }
}

type PendingOpen = BoxFuture<'static, Result<TransportLink>>;

struct SessionActor {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    capture: Box<dyn AudioCapture>,
    playback: PlaybackScheduler,
    store: MessageStore,
    batcher: TranscriptBatcher,

    commands: mpsc::UnboundedReceiver<Command>,
    info_tx: watch::Sender<SessionInfo>,
    /// Playback completion callbacks report here with their session id
    drained_tx: mpsc::UnboundedSender<String>,
    drained_rx: mpsc::UnboundedReceiver<String>,

    session_id: Option<String>,
    started_at: Option<DateTime<Utc>>,
    status: SessionStatus,
    /// The session is wanted; cleared by every disconnect path
    live: bool,
    attempt: u32,
    thinking: bool,
    audio_degraded: bool,

    link: Option<LinkSender>,
    events: Option<mpsc::Receiver<TransportEvent>>,
    frames: Option<mpsc::Receiver<AudioFrame>>,
    pending_open: Option<PendingOpen>,
    reconnect_timer: Option<Pin<Box<Sleep>>>,
    batch_timer: Option<Pin<Box<Sleep>>>,
}

impl SessionActor {
    async fn run(mut self) {
        debug!("Session task started");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(session_id) = self.drained_rx.recv() => {
                    self.on_playback_drained(session_id).await;
                }
                result = poll_open(&mut self.pending_open) => {
                    self.pending_open = None;
                    match result {
                        Ok(link) => self.on_open(link).await,
                        Err(e) => {
                            warn!("Connect failed: {:#}", e);
                            self.on_close(ABNORMAL_CLOSE).await;
                        }
                    }
                }
                event = recv_from(&mut self.events) => match event {
                    Some(TransportEvent::Message(text)) => self.on_message(&text).await,
                    Some(TransportEvent::Closed { code }) => self.on_close(code).await,
                    None => self.on_close(ABNORMAL_CLOSE).await,
                },
                frame = recv_from(&mut self.frames) => match frame {
                    Some(frame) => self.forward_frame(frame),
                    None => {
                        debug!("Capture channel closed");
                        self.frames = None;
                    }
                },
                _ = wait_for(&mut self.reconnect_timer) => {
                    self.reconnect_timer = None;
                    self.attempt += 1;
                    self.begin_connect();
                }
                _ = wait_for(&mut self.batch_timer) => {
                    self.batch_timer = None;
                    if self.batcher.run_pass() == PassState::Armed {
                        self.arm_batch_timer();
                    }
                }
            }
        }

        self.teardown(SessionStatus::Idle).await;
        debug!("Session task stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { reply } => {
                if self.live {
                    info!("Replacing live session with a fresh one");
                    self.teardown(SessionStatus::Idle).await;
                }
                self.attempt = 0;
                self.begin_connect();
                let _ = reply.send(());
            }
            Command::Disconnect { graceful, reply } => {
                self.disconnect(graceful).await;
                let _ = reply.send(());
            }
            Command::SendText { text, reply } => {
                let _ = reply.send(self.send_text(text));
            }
            Command::SendToolResponse { payload, reply } => {
                let sent = match self.connected_link() {
                    Some(link) => link.send(&ClientMessage::tool_response(payload)),
                    None => false,
                };
                let _ = reply.send(sent);
            }
        }
    }

    /// Open a transport for the current session, starting a new one if this
    /// is not a retry.
    fn begin_connect(&mut self) {
        let session_id = match (&self.session_id, self.attempt) {
            (Some(id), attempt) if attempt > 0 => id.clone(),
            _ => {
                let id = uuid::Uuid::new_v4().to_string();
                self.store.reset();
                self.batcher.reset();
                self.batch_timer = None;
                self.started_at = Some(Utc::now());
                self.session_id = Some(id.clone());
                id
            }
        };

        self.live = true;
        self.set_status(SessionStatus::Connecting);

        let url = self.config.socket_url(&session_id);
        info!(
            "Connecting session {} (attempt {})",
            session_id, self.attempt
        );

        let connector = Arc::clone(&self.connector);
        self.pending_open = Some(
            async move {
                let url = url?;
                connector.open(&url).await
            }
            .boxed(),
        );
    }

    async fn on_open(&mut self, link: TransportLink) {
        if !self.live {
            link.sender.close();
            return;
        }

        self.link = Some(link.sender);
        self.events = Some(link.events);
        self.attempt = 0;
        info!(
            "Session {} connected",
            self.session_id.as_deref().unwrap_or("-")
        );
        self.set_status(SessionStatus::Connected);

        self.send(&ClientMessage::setup());
        self.start_capture().await;
    }

    async fn on_message(&mut self, text: &str) {
        let message = match ServerMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("{:#}", e);
                return;
            }
        };

        match message {
            ServerMessage::SessionTerminated => self.on_terminated().await,
            ServerMessage::LinkBubble(link) => {
                self.batcher.push(TranscriptEvent::Link(link));
            }
            ServerMessage::Content(content) => {
                for payload in content.audio_payloads() {
                    match decode_audio_payload(payload) {
                        Ok(bytes) => self.playback.push(&bytes),
                        Err(e) => warn!("{:#}", e),
                    }
                }

                for event in content.transcript_events() {
                    if self.batcher.push(event) {
                        self.arm_batch_timer();
                    }
                }

                let thinking = if content.is_turn_complete() {
                    true
                } else if content.has_agent_activity() {
                    false
                } else {
                    self.thinking
                };
                if thinking != self.thinking {
                    self.thinking = thinking;
                    self.publish();
                }
            }
        }
    }

    /// The agent ended the session; close once its last words have played
    async fn on_terminated(&mut self) {
        info!("Session termination signal received");

        if self.playback.status() == PlaybackStatus::Playing {
            info!("Waiting for audio playback to finish");
            let drained = self.drained_tx.clone();
            let session_id = self.session_id.clone().unwrap_or_default();
            self.playback.set_on_complete(move || {
                let _ = drained.send(session_id);
            });
            self.playback.complete();
        } else {
            self.disconnect(true).await;
        }
    }

    async fn on_playback_drained(&mut self, session_id: String) {
        if !self.live || self.session_id.as_deref() != Some(session_id.as_str()) {
            debug!("Ignoring playback completion for session {}", session_id);
            return;
        }
        info!("Audio finished, disconnecting");
        self.disconnect(true).await;
    }

    async fn on_close(&mut self, code: u16) {
        self.link = None;
        self.events = None;
        info!("Transport closed with code {}", code);

        // Capture only runs while a transport is open
        self.stop_capture().await;

        if code == NORMAL_CLOSE || !self.live {
            self.disconnect(false).await;
            return;
        }

        if self.config.reconnect.can_retry(self.attempt) {
            let delay = self.config.reconnect.next_delay(self.attempt);
            info!(
                "Reconnecting in {}ms (attempt {}/{})",
                delay.as_millis(),
                self.attempt + 1,
                self.config.reconnect.max_attempts
            );
            self.reconnect_timer = Some(Box::pin(sleep(delay)));
            self.set_status(SessionStatus::Reconnecting);
        } else {
            warn!(
                "Giving up after {} reconnection attempts",
                self.config.reconnect.max_attempts
            );
            self.teardown(SessionStatus::Error).await;
        }
    }

    async fn disconnect(&mut self, graceful: bool) {
        if !self.live && self.link.is_none() && self.status == SessionStatus::Idle {
            debug!("Disconnect requested while idle");
        }

        self.teardown(SessionStatus::Idle).await;

        if graceful {
            info!("Graceful disconnect; the agent persists the conversation");
        } else {
            info!("Session disconnected");
        }
    }

    /// Release everything the session holds. Every step is idempotent.
    async fn teardown(&mut self, status: SessionStatus) {
        self.live = false;
        self.reconnect_timer = None;
        self.pending_open = None;
        self.attempt = 0;
        self.thinking = false;

        self.playback.stop();

        if let Some(link) = self.link.take() {
            link.close();
        }
        self.events = None;

        self.stop_capture().await;
        self.flush_transcripts();

        self.set_status(status);
    }

    fn send_text(&mut self, text: String) -> bool {
        if text.trim().is_empty() {
            return false;
        }
        let Some(link) = self.connected_link() else {
            debug!("Not connected, dropping text");
            return false;
        };

        if !link.send(&ClientMessage::user_text(text.clone())) {
            return false;
        }

        self.store
            .append(Role::User, text, MessageKind::Text, None);
        self.thinking = true;
        self.publish();
        true
    }

    fn forward_frame(&mut self, frame: AudioFrame) {
        if let Some(link) = self.connected_link() {
            link.send(&ClientMessage::audio(&frame));
        }
    }

    fn connected_link(&self) -> Option<&LinkSender> {
        if self.status == SessionStatus::Connected {
            self.link.as_ref()
        } else {
            None
        }
    }

    fn send(&self, message: &ClientMessage) {
        if let Some(link) = &self.link {
            link.send(message);
        }
    }

    async fn start_capture(&mut self) {
        match self.capture.start().await {
            Ok(frames) => {
                info!("Audio capture started ({})", self.capture.name());
                self.frames = Some(frames);
                self.audio_degraded = false;
            }
            Err(e) => {
                warn!(
                    "Audio capture unavailable, continuing without microphone: {:#}",
                    e
                );
                self.audio_degraded = true;
            }
        }
        self.publish();
    }

    async fn stop_capture(&mut self) {
        self.frames = None;
        if let Err(e) = self.capture.stop().await {
            warn!("Failed to stop audio capture: {:#}", e);
        }
    }

    fn arm_batch_timer(&mut self) {
        self.batch_timer = Some(Box::pin(sleep(self.config.batch_interval)));
    }

    /// Apply anything still queued so the log is final
    fn flush_transcripts(&mut self) {
        self.batch_timer = None;
        while self.batcher.run_pass() == PassState::Armed {}
    }

    fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
        self.publish();
    }

    fn publish(&self) {
        self.info_tx.send_replace(SessionInfo {
            session_id: self.session_id.clone(),
            status: self.status,
            started_at: self.started_at,
            thinking: self.thinking,
            audio_degraded: self.audio_degraded,
            reconnect_attempt: self.attempt,
        });
    }
}

async fn recv_from<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

async fn wait_for(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => pending().await,
    }
}

async fn poll_open(pending_open: &mut Option<PendingOpen>) -> Result<TransportLink> {
    match pending_open {
        Some(open) => open.await,
        None => pending().await,
    }
}
