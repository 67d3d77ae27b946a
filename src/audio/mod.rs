pub mod backend;
pub mod capture;
pub mod convert;
pub mod microphone;
pub mod output;
pub mod playback;

pub use backend::{AudioCapture, AudioFrame, CaptureConfig, NullCapture};
pub use capture::FrameAccumulator;
pub use microphone::Microphone;
pub use output::{AudioOutput, NullOutput, SpeakerOutput};
pub use playback::{PlaybackConfig, PlaybackScheduler, PlaybackStatus};
