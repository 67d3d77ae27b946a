pub mod audio;
pub mod config;
pub mod console;
pub mod http;
pub mod session;
pub mod transcript;
pub mod transport;

pub use audio::{
    AudioCapture, AudioFrame, AudioOutput, CaptureConfig, PlaybackConfig, PlaybackScheduler,
    PlaybackStatus,
};
pub use config::Config;
pub use console::{run_console, ConsoleExit};
pub use http::{create_router, AppState};
pub use session::{
    ReconnectPolicy, SessionConfig, SessionController, SessionDeps, SessionInfo, SessionStatus,
};
pub use transcript::{
    Message, MessageKind, MessageStore, Role, TranscriptBatcher, TranscriptEvent,
};
pub use transport::{
    ClientMessage, Connector, ServerMessage, TransportEvent, TransportLink, WsConnector,
};
