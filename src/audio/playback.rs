//! Gapless playback scheduling for streamed agent speech.
//!
//! Inbound PCM arrives in bursts of arbitrary size. The scheduler slices it into
//! fixed buffers and hands each one to the [`AudioOutput`] with an explicit start
//! time on the output clock, so consecutive buffers butt up against each other
//! no matter when the bytes arrived:
//!
//! - playback starts `initial_buffer` ahead of the clock to absorb jitter
//! - a buffer is only submitted once its start time falls inside the
//!   `look_ahead` window; the next pass is timed for just that moment
//! - when the queue runs dry mid-stream the scheduler polls every
//!   `poll_interval` for late arrivals
//! - once the stream is marked complete and the last buffer has finished
//!   sounding, the completion callback fires exactly once
//!
//! The scheduler is `Clone`; clones share one queue and one clock.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::convert::decode_pcm16_le;
use super::output::AudioOutput;

/// Timing parameters for playback scheduling
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Samples per scheduled buffer
    pub buffer_samples: usize,
    /// Lead time before the first buffer of a stream starts
    pub initial_buffer: Duration,
    /// How far ahead of the clock buffers may be submitted
    pub look_ahead: Duration,
    /// Recheck interval while waiting for more audio
    pub poll_interval: Duration,
    /// Fade applied by `stop()`
    pub stop_ramp: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            buffer_samples: 7680, // 320ms at 24kHz
            initial_buffer: Duration::from_millis(80),
            look_ahead: Duration::from_millis(150),
            poll_interval: Duration::from_millis(100),
            stop_ramp: Duration::from_millis(100),
        }
    }
}

/// Externally visible playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackStatus {
    Playing,
    Stopped,
    Complete,
}

pub type CompletionCallback = Box<dyn FnOnce() + Send + 'static>;

/// Converts inbound PCM chunks into click-free, correctly timed output
#[derive(Clone)]
pub struct PlaybackScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    output: Arc<dyn AudioOutput>,
    config: PlaybackConfig,
    state: Mutex<SchedulerState>,
}

#[derive(Default)]
struct SchedulerState {
    queue: VecDeque<Vec<f32>>,
    is_playing: bool,
    stream_complete: bool,
    /// Output-clock time the next buffer starts at; never decreases
    scheduled_time: f64,
    on_complete: Option<CompletionCallback>,
    timer: Option<JoinHandle<()>>,
}

impl SchedulerState {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl PlaybackScheduler {
    pub fn new(output: Arc<dyn AudioOutput>, config: PlaybackConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                output,
                config,
                state: Mutex::new(SchedulerState::default()),
            }),
        }
    }

    /// Queue a chunk of little-endian 16-bit PCM and start playback if idle.
    ///
    /// Clears a previous `complete()`, so a stream can resume after a gap.
    pub fn push(&self, chunk: &[u8]) {
        let samples = decode_pcm16_le(chunk);
        let buffer_samples = self.inner.config.buffer_samples.max(1);

        {
            let mut state = self.inner.state.lock();
            state.stream_complete = false;

            if samples.is_empty() {
                return;
            }

            for buffer in samples.chunks(buffer_samples) {
                state.queue.push_back(buffer.to_vec());
            }

            if state.is_playing {
                return;
            }

            state.is_playing = true;
            let start = self.inner.output.current_time()
                + self.inner.config.initial_buffer.as_secs_f64();
            state.scheduled_time = state.scheduled_time.max(start);
            debug!(
                "Playback starting at {:.3}s ({} buffers queued)",
                state.scheduled_time,
                state.queue.len()
            );
        }

        run_pass(&self.inner);
    }

    /// Mark the stream finished.
    ///
    /// Fires the completion callback right away when nothing is queued or
    /// playing; otherwise once the queued audio has played out.
    pub fn complete(&self) {
        let (callback, playing) = {
            let mut state = self.inner.state.lock();
            state.stream_complete = true;
            if state.queue.is_empty() && !state.is_playing {
                (state.on_complete.take(), false)
            } else {
                (None, state.is_playing)
            }
        };

        if let Some(callback) = callback {
            callback();
        } else if playing {
            run_pass(&self.inner);
        }
    }

    /// Drop everything queued and fade the output to silence.
    ///
    /// Any registered completion callback is discarded. The scheduler can be
    /// reused for a new stream straight away.
    pub fn stop(&self) {
        {
            let mut state = self.inner.state.lock();
            state.is_playing = false;
            state.stream_complete = true;
            state.queue.clear();
            state.on_complete = None;
            state.cancel_timer();
        }

        self.inner.output.fade_out(self.inner.config.stop_ramp);
    }

    pub fn status(&self) -> PlaybackStatus {
        let state = self.inner.state.lock();
        if state.stream_complete && !state.is_playing {
            PlaybackStatus::Complete
        } else if state.is_playing {
            PlaybackStatus::Playing
        } else {
            PlaybackStatus::Stopped
        }
    }

    /// Register the callback fired when a completed stream finishes playing.
    /// Replaces any earlier registration.
    pub fn set_on_complete(&self, callback: impl FnOnce() + Send + 'static) {
        self.inner.state.lock().on_complete = Some(Box::new(callback));
    }

    /// Buffers waiting to be submitted to the output
    pub fn queued_buffers(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Output-clock time at which everything submitted so far ends
    pub fn scheduled_until(&self) -> f64 {
        self.inner.state.lock().scheduled_time
    }
}

/// One scheduling pass: submit what fits in the look-ahead window, then decide
/// when to look again.
fn run_pass(inner: &Arc<Inner>) {
    let callback = {
        let mut state = inner.state.lock();
        if !state.is_playing {
            return;
        }

        let output = &inner.output;
        let rate = output.sample_rate().max(1) as f64;
        let look_ahead = inner.config.look_ahead.as_secs_f64();
        let now = output.current_time();

        while state.scheduled_time <= now + look_ahead {
            let Some(buffer) = state.queue.pop_front() else {
                break;
            };
            let start = state.scheduled_time.max(now);
            let duration = buffer.len() as f64 / rate;
            output.schedule(buffer, start);
            state.scheduled_time = start + duration;
        }

        if state.queue.is_empty() {
            if state.stream_complete {
                let remaining = state.scheduled_time - now;
                if remaining <= 0.0 {
                    state.is_playing = false;
                    state.cancel_timer();
                    state.on_complete.take()
                } else {
                    // Let the tail finish sounding before reporting completion
                    let delay = Duration::from_secs_f64(remaining.max(0.001));
                    arm_timer(inner, &mut state, delay);
                    None
                }
            } else {
                let poll = inner.config.poll_interval;
                arm_timer(inner, &mut state, poll);
                None
            }
        } else {
            let until_due = state.scheduled_time - look_ahead - now;
            let delay = Duration::from_secs_f64(until_due.max(0.001));
            arm_timer(inner, &mut state, delay);
            None
        }
    };

    if let Some(callback) = callback {
        debug!("Playback complete");
        callback();
    }
}

fn arm_timer(inner: &Arc<Inner>, state: &mut SchedulerState, delay: Duration) {
    state.cancel_timer();

    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        warn!("No async runtime available, playback scheduling paused");
        return;
    };

    let weak: Weak<Inner> = Arc::downgrade(inner);
    state.timer = Some(runtime.spawn(async move {
        tokio::time::sleep(delay).await;
        if let Some(inner) = weak.upgrade() {
            run_pass(&inner);
        }
    }));
}
