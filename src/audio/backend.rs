use anyhow::Result;
use tokio::sync::mpsc;

/// One outbound microphone frame (16-bit PCM, mono)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples, always `frame_samples` long
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

impl AudioFrame {
    /// Little-endian PCM bytes, as sent over the wire
    pub fn to_pcm_bytes(&self) -> Vec<u8> {
        super::convert::encode_pcm16_le(&self.samples)
    }
}

/// Configuration for microphone capture
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Rate frames are produced at (the agent expects 16kHz)
    pub sample_rate: u32,
    /// Samples per outbound frame
    pub frame_samples: usize,
    /// Depth of the channel between the device callback and the framer
    pub channel_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,  // 16kHz realtime input
            frame_samples: 1536, // ~96ms per frame
            channel_capacity: 64,
        }
    }
}

/// Microphone capture backend trait
///
/// Implementations:
/// - `Microphone`: default input device via cpal
/// - `NullCapture`: no device, for text-only sessions and tests
#[async_trait::async_trait]
pub trait AudioCapture: Send + Sync {
    /// Acquire the device and start producing frames
    ///
    /// Returns a channel receiver that will receive fixed-size frames.
    /// Calling `start` again after `stop` must acquire the device anew.
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>>;

    /// Release the device. Safe to call when not capturing.
    async fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Capture backend that never produces audio
#[derive(Debug, Default)]
pub struct NullCapture {
    capturing: bool,
    // Held so the receiver stays open (and silent) until stop
    tx: Option<mpsc::Sender<AudioFrame>>,
}

impl NullCapture {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl AudioCapture for NullCapture {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        let (tx, rx) = mpsc::channel(1);
        self.tx = Some(tx);
        self.capturing = true;
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.tx = None;
        self.capturing = false;
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "null capture"
    }
}
