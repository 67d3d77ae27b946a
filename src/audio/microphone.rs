// Microphone capture via cpal
//
// cpal streams are not Send on every platform, so each capture owns a
// dedicated thread that builds the input stream, parks until told to stop,
// then drops the stream (releasing the device).

use anyhow::{bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SizedSample};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::{AudioCapture, AudioFrame, CaptureConfig};
use super::capture::spawn_framer;
use super::convert::downmix_into;

/// Capacity of pooled callback buffers (mono samples per device cycle)
const POOL_BUFFER_SAMPLES: usize = 4096;

/// Default input device backend
pub struct Microphone {
    config: CaptureConfig,
    worker: Option<CaptureWorker>,
}

struct CaptureWorker {
    stop_tx: std::sync::mpsc::Sender<()>,
    thread: std::thread::JoinHandle<()>,
    framer: JoinHandle<()>,
    dropped_cycles: Arc<AtomicU64>,
}

impl Microphone {
    pub fn new(config: CaptureConfig) -> Self {
        info!(
            "Microphone backend initialized ({}Hz, {} samples/frame)",
            config.sample_rate, config.frame_samples
        );

        Self {
            config,
            worker: None,
        }
    }
}

#[async_trait::async_trait]
impl AudioCapture for Microphone {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.worker.is_some() {
            bail!("Already capturing");
        }

        info!("Acquiring default input device");

        let capacity = self.config.channel_capacity.max(1);
        let (raw_tx, raw_rx) = mpsc::channel::<Vec<f32>>(capacity);

        // Buffer pool for the device callback, seeded here so the real-time
        // thread never allocates in steady state
        let (recycle_tx, recycle_rx) = mpsc::channel::<Vec<f32>>(capacity + 1);
        for _ in 0..capacity {
            let _ = recycle_tx.try_send(Vec::with_capacity(POOL_BUFFER_SAMPLES));
        }
        let (ready_tx, ready_rx) = oneshot::channel::<Result<u32, String>>();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
        let dropped_cycles = Arc::new(AtomicU64::new(0));
        let dropped = Arc::clone(&dropped_cycles);

        let thread = std::thread::Builder::new()
            .name("loqa-live-capture".to_string())
            .spawn(move || run_input_stream(raw_tx, recycle_rx, ready_tx, stop_rx, dropped))
            .context("Failed to spawn capture thread")?;

        let device_rate = match ready_rx.await {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => {
                let _ = tokio::task::spawn_blocking(move || thread.join()).await;
                bail!("Failed to open microphone: {}", e);
            }
            Err(_) => {
                let _ = tokio::task::spawn_blocking(move || thread.join()).await;
                bail!("Capture thread exited before the stream started");
            }
        };

        let (framer, frame_rx) =
            spawn_framer(raw_rx, device_rate, &self.config, Some(recycle_tx));

        self.worker = Some(CaptureWorker {
            stop_tx,
            thread,
            framer,
            dropped_cycles,
        });

        info!("Microphone capture started (device rate {}Hz)", device_rate);

        Ok(frame_rx)
    }

    async fn stop(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };

        info!("Releasing microphone");

        // The thread may already be gone if the stream failed; ignore send errors
        let _ = worker.stop_tx.send(());
        worker.framer.abort();

        let dropped = worker.dropped_cycles.load(Ordering::Relaxed);
        if dropped > 0 {
            warn!("{} capture cycles dropped while the consumer lagged", dropped);
        }

        match tokio::task::spawn_blocking(move || worker.thread.join()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => warn!("Capture thread panicked"),
            Err(e) => warn!("Failed to join capture thread: {}", e),
        }

        info!("Microphone released");

        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.worker.is_some()
    }

    fn name(&self) -> &str {
        "cpal microphone"
    }
}

impl Drop for Microphone {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop_tx.send(());
            worker.framer.abort();
        }
    }
}

fn run_input_stream(
    raw_tx: mpsc::Sender<Vec<f32>>,
    recycle_rx: mpsc::Receiver<Vec<f32>>,
    ready_tx: oneshot::Sender<Result<u32, String>>,
    stop_rx: std::sync::mpsc::Receiver<()>,
    dropped: Arc<AtomicU64>,
) {
    let stream = match open_input_stream(raw_tx, recycle_rx, dropped) {
        Ok((stream, rate)) => {
            let _ = ready_tx.send(Ok(rate));
            stream
        }
        Err(e) => {
            let _ = ready_tx.send(Err(format!("{:#}", e)));
            return;
        }
    };

    // Park until stop() or until the owner is dropped
    let _ = stop_rx.recv();
    drop(stream);
    debug!("Input stream dropped");
}

fn open_input_stream(
    raw_tx: mpsc::Sender<Vec<f32>>,
    recycle_rx: mpsc::Receiver<Vec<f32>>,
    dropped: Arc<AtomicU64>,
) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .context("No input device available")?;
    let supported = device
        .default_input_config()
        .context("Failed to query default input config")?;

    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels();
    let config: cpal::StreamConfig = supported.config();

    debug!(
        "Input device: {} ({}Hz, {} channels, {:?})",
        device.name().unwrap_or_else(|_| "unknown".to_string()),
        sample_rate,
        channels,
        supported.sample_format()
    );

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_input::<f32>(&device, &config, channels, raw_tx, recycle_rx, dropped),
        SampleFormat::I16 => build_input::<i16>(&device, &config, channels, raw_tx, recycle_rx, dropped),
        SampleFormat::U16 => build_input::<u16>(&device, &config, channels, raw_tx, recycle_rx, dropped),
        other => bail!("Unsupported input sample format: {:?}", other),
    }?;

    stream.play().context("Failed to start input stream")?;

    Ok((stream, sample_rate))
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: u16,
    raw_tx: mpsc::Sender<Vec<f32>>,
    mut recycle_rx: mpsc::Receiver<Vec<f32>>,
    dropped: Arc<AtomicU64>,
) -> Result<cpal::Stream>
where
    T: SizedSample,
    f32: cpal::FromSample<T>,
{
    let mut spare: Option<Vec<f32>> = None;

    let stream = device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let mut buffer = spare
                    .take()
                    .or_else(|| recycle_rx.try_recv().ok())
                    .unwrap_or_default();
                downmix_into(data, channels, &mut buffer, |s| s.to_sample::<f32>());

                // Never block the device thread
                if let Err(e) = raw_tx.try_send(buffer) {
                    dropped.fetch_add(1, Ordering::Relaxed);
                    spare = Some(e.into_inner());
                }
            },
            |err| warn!("Input stream error: {}", err),
            None,
        )
        .context("Failed to build input stream")?;

    Ok(stream)
}
