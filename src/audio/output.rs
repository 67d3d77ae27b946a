// Audio output: the playback clock and the place scheduled buffers end up
//
// The playback scheduler only talks to the `AudioOutput` trait. `SpeakerOutput`
// drives the default output device through cpal; its device callback mixes
// scheduled buffers against a rendered-frame counter, and that counter is the
// playback clock. Buffers and fades reach the callback through a channel, so
// the callback never waits on the control side.

use anyhow::{bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::convert::resample_linear;

/// Sink for scheduled playback buffers
pub trait AudioOutput: Send + Sync {
    /// Rate of the buffers passed to `schedule`
    fn sample_rate(&self) -> u32;

    /// Current position of the output clock, in seconds
    fn current_time(&self) -> f64;

    /// Play `samples` (mono, at `sample_rate()`) starting at `start_at` on the output clock
    fn schedule(&self, samples: Vec<f32>, start_at: f64);

    /// Ramp the current gain stage linearly to silence over `ramp`, then discard
    /// it together with every buffer scheduled on it. Buffers scheduled after
    /// this call play on a fresh unity-gain stage.
    fn fade_out(&self, ramp: Duration);
}

/// Output that keeps time but plays nothing (text-only sessions)
#[derive(Debug)]
pub struct NullOutput {
    sample_rate: u32,
    epoch: tokio::time::Instant,
}

impl NullOutput {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            epoch: tokio::time::Instant::now(),
        }
    }
}

impl AudioOutput for NullOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    fn schedule(&self, _samples: Vec<f32>, _start_at: f64) {}

    fn fade_out(&self, _ramp: Duration) {}
}

enum OutputCommand {
    Play { start_frame: u64, samples: Vec<f32> },
    FadeOut { ramp_frames: u64 },
}

/// Default output device via cpal
pub struct SpeakerOutput {
    source_rate: u32,
    device_rate: u32,
    frames_rendered: Arc<AtomicU64>,
    commands: mpsc::UnboundedSender<OutputCommand>,
    stop_tx: std::sync::mpsc::Sender<()>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl SpeakerOutput {
    /// Open the default output device. `source_rate` is the rate of the
    /// buffers the scheduler will hand over (24kHz agent speech).
    pub fn open(source_rate: u32) -> Result<Self> {
        let frames_rendered = Arc::new(AtomicU64::new(0));
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<u32, String>>();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

        let mixer = Mixer {
            channels: 1,
            frames_rendered: Arc::clone(&frames_rendered),
            commands: command_rx,
            stages: vec![GainStage::default()],
            scratch: Vec::new(),
        };

        let thread = std::thread::Builder::new()
            .name("loqa-live-playback".to_string())
            .spawn(move || run_output_stream(mixer, ready_tx, stop_rx))
            .context("Failed to spawn playback thread")?;

        let device_rate = match ready_rx.recv() {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => {
                let _ = thread.join();
                bail!("Failed to open output device: {}", e);
            }
            Err(_) => {
                let _ = thread.join();
                bail!("Playback thread exited before the stream started");
            }
        };

        info!(
            "Speaker output opened ({}Hz source, {}Hz device)",
            source_rate, device_rate
        );

        Ok(Self {
            source_rate,
            device_rate,
            frames_rendered,
            commands,
            stop_tx,
            thread: Some(thread),
        })
    }
}

impl AudioOutput for SpeakerOutput {
    fn sample_rate(&self) -> u32 {
        self.source_rate
    }

    fn current_time(&self) -> f64 {
        self.frames_rendered.load(Ordering::Acquire) as f64 / self.device_rate as f64
    }

    fn schedule(&self, samples: Vec<f32>, start_at: f64) {
        let start_frame = (start_at.max(0.0) * self.device_rate as f64).round() as u64;
        let samples = resample_linear(&samples, self.source_rate, self.device_rate);
        if self
            .commands
            .send(OutputCommand::Play {
                start_frame,
                samples,
            })
            .is_err()
        {
            warn!("Playback stream is gone, dropping buffer");
        }
    }

    fn fade_out(&self, ramp: Duration) {
        let ramp_frames = (ramp.as_secs_f64() * self.device_rate as f64).round() as u64;
        let _ = self.commands.send(OutputCommand::FadeOut { ramp_frames });
    }
}

impl Drop for SpeakerOutput {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Playback thread panicked");
            }
        }
    }
}

/// Buffers sharing one gain envelope
#[derive(Default)]
struct GainStage {
    voices: Vec<Voice>,
    /// (start, end) frames of a linear ramp to silence
    fade: Option<(u64, u64)>,
}

impl GainStage {
    fn gain_at(&self, frame: u64) -> f32 {
        match self.fade {
            None => 1.0,
            Some((start, end)) => {
                if frame >= end {
                    0.0
                } else if frame <= start {
                    1.0
                } else {
                    1.0 - (frame - start) as f32 / (end - start) as f32
                }
            }
        }
    }
}

struct Voice {
    start_frame: u64,
    samples: Vec<f32>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }

    fn sample_at(&self, frame: u64) -> f32 {
        if frame < self.start_frame {
            return 0.0;
        }
        self.samples
            .get((frame - self.start_frame) as usize)
            .copied()
            .unwrap_or(0.0)
    }
}

/// State owned by the device callback
struct Mixer {
    channels: usize,
    frames_rendered: Arc<AtomicU64>,
    commands: mpsc::UnboundedReceiver<OutputCommand>,
    stages: Vec<GainStage>,
    scratch: Vec<f32>,
}

impl Mixer {
    fn apply_commands(&mut self) {
        let now = self.frames_rendered.load(Ordering::Acquire);

        while let Ok(command) = self.commands.try_recv() {
            match command {
                OutputCommand::Play {
                    start_frame,
                    samples,
                } => {
                    if let Some(stage) = self.stages.last_mut() {
                        stage.voices.push(Voice {
                            start_frame,
                            samples,
                        });
                    }
                }
                OutputCommand::FadeOut { ramp_frames } => {
                    if let Some(stage) = self.stages.last_mut() {
                        stage.fade = Some((now, now + ramp_frames.max(1)));
                    }
                    self.stages.push(GainStage::default());
                }
            }
        }
    }

    /// Render mono frames into `scratch`, advancing the clock
    fn render(&mut self, frames: usize) {
        self.apply_commands();

        let base = self.frames_rendered.load(Ordering::Acquire);
        self.scratch.clear();
        self.scratch.resize(frames, 0.0);

        for (i, out) in self.scratch.iter_mut().enumerate() {
            let frame = base + i as u64;
            let mut acc = 0.0f32;
            for stage in &self.stages {
                let gain = stage.gain_at(frame);
                if gain == 0.0 {
                    continue;
                }
                for voice in &stage.voices {
                    acc += voice.sample_at(frame) * gain;
                }
            }
            *out = acc.clamp(-1.0, 1.0);
        }

        let end = base + frames as u64;
        self.frames_rendered.store(end, Ordering::Release);

        // Retire finished voices and faded stages (the last stage is always live)
        for stage in &mut self.stages {
            stage.voices.retain(|voice| voice.end_frame() > end);
        }
        let last = self.stages.len().saturating_sub(1);
        let mut index = 0;
        self.stages.retain(|stage| {
            let keep = index == last || !matches!(stage.fade, Some((_, fade_end)) if fade_end <= end);
            index += 1;
            keep
        });
    }

    fn fill<T>(&mut self, data: &mut [T])
    where
        T: Sample + FromSample<f32>,
    {
        let frames = data.len() / self.channels.max(1);
        self.render(frames);
        for (frame, chunk) in data.chunks_mut(self.channels.max(1)).enumerate() {
            let value = self.scratch.get(frame).copied().unwrap_or(0.0);
            for slot in chunk {
                *slot = T::from_sample(value);
            }
        }
    }
}

fn run_output_stream(
    mixer: Mixer,
    ready_tx: std::sync::mpsc::Sender<Result<u32, String>>,
    stop_rx: std::sync::mpsc::Receiver<()>,
) {
    let stream = match open_output_stream(mixer) {
        Ok((stream, rate)) => {
            let _ = ready_tx.send(Ok(rate));
            stream
        }
        Err(e) => {
            let _ = ready_tx.send(Err(format!("{:#}", e)));
            return;
        }
    };

    let _ = stop_rx.recv();
    drop(stream);
    debug!("Output stream dropped");
}

fn open_output_stream(mut mixer: Mixer) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .context("No output device available")?;
    let supported = device
        .default_output_config()
        .context("Failed to query default output config")?;

    let sample_rate = supported.sample_rate().0;
    mixer.channels = supported.channels() as usize;
    let config: cpal::StreamConfig = supported.config();

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_output::<f32>(&device, &config, mixer),
        SampleFormat::I16 => build_output::<i16>(&device, &config, mixer),
        SampleFormat::U16 => build_output::<u16>(&device, &config, mixer),
        other => bail!("Unsupported output sample format: {:?}", other),
    }?;

    stream.play().context("Failed to start output stream")?;

    Ok((stream, sample_rate))
}

fn build_output<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut mixer: Mixer,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| mixer.fill(data),
            |err| warn!("Output stream error: {}", err),
            None,
        )
        .context("Failed to build output stream")?;

    Ok(stream)
}
