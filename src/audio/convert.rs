//! PCM sample conversion shared by the capture and playback paths.

/// Decode little-endian signed 16-bit PCM into normalized floats.
///
/// A trailing odd byte is ignored.
pub fn decode_pcm16_le(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect()
}

/// Encode samples as little-endian signed 16-bit PCM bytes
pub fn encode_pcm16_le(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Clamp a float sample to [-1, 1] and scale it to the signed 16-bit range.
pub fn quantize_sample(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Average interleaved channels down to mono into `out`, reusing its
/// allocation. `out` is cleared first.
pub fn downmix_into<T: Copy>(
    interleaved: &[T],
    channels: u16,
    out: &mut Vec<f32>,
    to_f32: impl Fn(T) -> f32,
) {
    out.clear();
    let channels = channels.max(1) as usize;
    out.extend(
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().map(|&s| to_f32(s)).sum::<f32>() / channels as f32),
    );
}

/// One-shot linear interpolation resampling.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let new_len = (samples.len() as f64 / ratio).ceil() as usize;
    let mut resampled = Vec::with_capacity(new_len);

    for i in 0..new_len {
        let src_idx = i as f64 * ratio;
        let idx0 = (src_idx.floor() as usize).min(samples.len() - 1);
        let idx1 = (idx0 + 1).min(samples.len() - 1);
        let frac = (src_idx - idx0 as f64) as f32;
        resampled.push(samples[idx0] * (1.0 - frac) + samples[idx1] * frac);
    }

    resampled
}

/// Streaming linear resampler.
///
/// Keeps the fractional read position and the last input sample between calls
/// so consecutive capture cycles join without discontinuities.
#[derive(Debug, Clone)]
pub struct LinearResampler {
    step: f64,
    pos: f64,
    prev: Option<f32>,
    passthrough: bool,
}

impl LinearResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            step: from_rate as f64 / to_rate.max(1) as f64,
            pos: 0.0,
            prev: None,
            passthrough: from_rate == to_rate,
        }
    }

    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if self.passthrough {
            return input.to_vec();
        }
        if input.is_empty() {
            return Vec::new();
        }

        // Index 0 is the carried sample from the previous call, when there is one.
        let prev = self.prev;
        let offset = usize::from(prev.is_some());
        let len = input.len() + offset;
        let sample_at = |i: usize| -> f32 {
            if i < offset {
                prev.unwrap_or(0.0)
            } else {
                input[i - offset]
            }
        };

        let mut out = Vec::with_capacity((input.len() as f64 / self.step).ceil() as usize + 1);
        while self.pos >= 0.0 && (self.pos.floor() as usize) + 1 < len {
            let idx0 = self.pos.floor() as usize;
            let frac = (self.pos - idx0 as f64) as f32;
            out.push(sample_at(idx0) * (1.0 - frac) + sample_at(idx0 + 1) * frac);
            self.pos += self.step;
        }

        self.pos -= (len - 1) as f64;
        self.prev = input.last().copied();
        out
    }

    pub fn reset(&mut self) {
        self.pos = 0.0;
        self.prev = None;
    }
}
