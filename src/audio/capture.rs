//! Capture framing: turns variable-sized capture cycles into fixed outbound frames.
//!
//! The device callback only hands raw mono samples across a channel. Everything
//! stateful (resampling position, the partially filled frame) lives here, on the
//! single consumer task.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::backend::{AudioFrame, CaptureConfig};
use super::convert::{quantize_sample, LinearResampler};

/// Accumulates quantized samples until a full frame is available
#[derive(Debug)]
pub struct FrameAccumulator {
    buffer: Vec<i16>,
    frame_samples: usize,
    sample_rate: u32,
    samples_emitted: u64,
}

impl FrameAccumulator {
    pub fn new(frame_samples: usize, sample_rate: u32) -> Self {
        Self {
            buffer: Vec::with_capacity(frame_samples),
            frame_samples: frame_samples.max(1),
            sample_rate,
            samples_emitted: 0,
        }
    }

    /// Feed one capture cycle of float samples in [-1, 1].
    ///
    /// Returns every frame completed by this cycle. A partial frame carries
    /// over to the next call.
    pub fn push_cycle(&mut self, samples: &[f32]) -> Vec<AudioFrame> {
        let mut frames = Vec::new();

        for &sample in samples {
            self.buffer.push(quantize_sample(sample));
            if self.buffer.len() >= self.frame_samples {
                let timestamp_ms = self.samples_emitted * 1000 / self.sample_rate.max(1) as u64;
                self.samples_emitted += self.frame_samples as u64;
                let samples = std::mem::replace(
                    &mut self.buffer,
                    Vec::with_capacity(self.frame_samples),
                );
                frames.push(AudioFrame {
                    samples,
                    sample_rate: self.sample_rate,
                    timestamp_ms,
                });
            }
        }

        frames
    }

    /// Samples waiting for the next frame
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

/// Spawn the consumer task that resamples raw device audio and frames it.
///
/// Spent raw buffers go back through `recycle` (when given) so the device
/// callback can refill them instead of allocating. The returned receiver
/// closes when `raw_rx` closes (device released).
pub fn spawn_framer(
    mut raw_rx: mpsc::Receiver<Vec<f32>>,
    device_rate: u32,
    config: &CaptureConfig,
    recycle: Option<mpsc::Sender<Vec<f32>>>,
) -> (JoinHandle<()>, mpsc::Receiver<AudioFrame>) {
    let (frame_tx, frame_rx) = mpsc::channel(config.channel_capacity.max(1));
    let mut resampler = LinearResampler::new(device_rate, config.sample_rate);
    let mut accumulator = FrameAccumulator::new(config.frame_samples, config.sample_rate);

    let handle = tokio::spawn(async move {
        debug!("Capture framer started ({}Hz -> {}Hz)", device_rate, accumulator.sample_rate);

        while let Some(raw) = raw_rx.recv().await {
            let resampled = resampler.process(&raw);
            if let Some(recycle) = &recycle {
                // Pool full or device gone: let the buffer drop
                let _ = recycle.try_send(raw);
            }
            for frame in accumulator.push_cycle(&resampled) {
                if frame_tx.send(frame).await.is_err() {
                    debug!("Frame receiver dropped, stopping framer");
                    return;
                }
            }
        }

        debug!("Capture framer stopped");
    });

    (handle, frame_rx)
}
