//! Transcript batching.
//!
//! Partial transcripts arrive far more often than anyone needs to see them.
//! Events are queued and folded into the message log once per pass, so a burst
//! of deltas costs one log write per role instead of one per event.
//!
//! The pass is an explicit two-state scheduler: pushing onto an empty queue arms
//! it, and it disarms only when a pass finds the queue empty. The owner runs
//! [`TranscriptBatcher::run_pass`] on its own tick while [`PassState::Armed`].

use tracing::debug;

use super::store::{LinkTarget, MessageId, MessageKind, MessageStore, Role};

/// One inbound transcript event, already normalized from the wire format
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptEvent {
    /// Text part of a model turn (appended)
    AgentText(String),
    /// Output audio transcription (appended)
    AgentTranscription(String),
    /// Input audio transcription delta for the user
    UserText(String),
    /// The remote peer closed the current turn
    TurnComplete,
    /// Link bubble; bypasses batching
    Link(LinkTarget),
}

/// Net effect of one batch
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub agent_delta: String,
    pub user_text: Option<String>,
    pub turn_complete: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassState {
    Idle,
    Armed,
}

pub struct TranscriptBatcher {
    store: MessageStore,
    queue: Vec<TranscriptEvent>,
    state: PassState,
    live_user: Option<MessageId>,
    live_agent: Option<MessageId>,
    /// Raw user transcription accumulated over the current turn
    user_text: String,
}

impl TranscriptBatcher {
    pub fn new(store: MessageStore) -> Self {
        Self {
            store,
            queue: Vec::new(),
            state: PassState::Idle,
            live_user: None,
            live_agent: None,
            user_text: String::new(),
        }
    }

    /// Queue an event.
    ///
    /// Returns true when this push armed the pass (the queue went from empty
    /// to non-empty while idle). Link events are written straight to the log.
    pub fn push(&mut self, event: TranscriptEvent) -> bool {
        if let TranscriptEvent::Link(link) = event {
            debug!("Link bubble: {}", link.url);
            let alias = link.alias.clone();
            self.store
                .append(Role::AgentLink, alias, MessageKind::Link, Some(link));
            return false;
        }

        self.queue.push(event);
        if self.state == PassState::Idle {
            self.state = PassState::Armed;
            return true;
        }
        false
    }

    pub fn state(&self) -> PassState {
        self.state
    }

    pub fn is_armed(&self) -> bool {
        self.state == PassState::Armed
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Drain everything queued since the last pass and apply its net effect.
    ///
    /// Returns the state after the pass: still armed if it did any work, idle
    /// if it found nothing to do.
    pub fn run_pass(&mut self) -> PassState {
        if self.queue.is_empty() {
            self.state = PassState::Idle;
            return self.state;
        }

        let batch = std::mem::take(&mut self.queue);
        let summary = self.summarize(&batch);
        self.apply(&summary);

        self.state
    }

    /// Clear the queue, disarm, and forget per-turn state
    pub fn reset(&mut self) {
        self.queue.clear();
        self.state = PassState::Idle;
        self.live_user = None;
        self.live_agent = None;
        self.user_text.clear();
    }

    fn summarize(&mut self, batch: &[TranscriptEvent]) -> BatchSummary {
        let mut summary = BatchSummary::default();

        for event in batch {
            match event {
                TranscriptEvent::AgentText(text) | TranscriptEvent::AgentTranscription(text) => {
                    summary.agent_delta.push_str(text);
                }
                TranscriptEvent::UserText(text) => {
                    if !text.is_empty() {
                        self.user_text.push_str(text);
                        // Only the latest cumulative value matters
                        summary.user_text = Some(self.user_text.trim().to_string());
                    }
                }
                TranscriptEvent::TurnComplete => summary.turn_complete = true,
                TranscriptEvent::Link(_) => {}
            }
        }

        summary
    }

    fn apply(&mut self, summary: &BatchSummary) {
        if !summary.agent_delta.is_empty() {
            upsert_live(
                &self.store,
                &mut self.live_agent,
                Role::Agent,
                &summary.agent_delta,
                false,
            );
        }

        if let Some(text) = &summary.user_text {
            upsert_live(&self.store, &mut self.live_user, Role::User, text, true);
        }

        if summary.turn_complete {
            let final_text = self.user_text.trim().to_string();
            if !final_text.is_empty() {
                debug!("Committing user text: {}", final_text);
                upsert_live(&self.store, &mut self.live_user, Role::User, &final_text, true);
            }
            debug!("Turn complete ({} messages so far)", self.store.len());
            self.live_user = None;
            self.live_agent = None;
            self.user_text.clear();
        }
    }
}

/// Update the live message for a role, creating it if this turn has none yet
fn upsert_live(
    store: &MessageStore,
    live: &mut Option<MessageId>,
    role: Role,
    text: &str,
    replace: bool,
) {
    if let Some(id) = live.as_deref() {
        if store.update_live(id, text, replace) {
            return;
        }
    }
    *live = Some(store.append(role, text, MessageKind::Text, None));
}
