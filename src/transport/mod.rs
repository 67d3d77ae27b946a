//! Connection to the remote agent
//!
//! - Wire envelopes, in both directions
//! - The `Connector` seam and its WebSocket implementation
//! - The termination beacon sent on process teardown

mod beacon;
mod client;
mod messages;

pub use beacon::TerminationBeacon;
pub use client::{
    Connector, LinkPeer, LinkSender, OutboundFrame, TransportEvent, TransportLink, WsConnector,
    ABNORMAL_CLOSE, NORMAL_CLOSE, NO_STATUS_CLOSE,
};
pub use messages::{
    decode_audio_payload, ClientMessage, InlineData, ModelTurn, Part, ServerContent,
    ServerMessage, Transcription,
};
