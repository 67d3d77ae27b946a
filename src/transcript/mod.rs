//! Conversation log and the batcher that feeds it from streaming transcripts

mod batcher;
mod store;

pub use batcher::{BatchSummary, PassState, TranscriptBatcher, TranscriptEvent};
pub use store::{LinkTarget, Message, MessageId, MessageKind, MessageStore, Role};
