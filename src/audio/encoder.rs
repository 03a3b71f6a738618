//! Microphone resampling and frame encoding
//!
//! Converts raw capture samples (f32, arbitrary native rate) into fixed-size
//! 16 kHz PCM16 frames, base64-encoded for transport. Runs inside the capture
//! callback on the audio thread, so it never allocates a socket or blocks on
//! the session task.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

/// Target sample rate for outbound audio (speech band)
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Samples per outbound frame (20 ms at 16 kHz)
pub const FRAME_SAMPLES: usize = 320;

/// One encoded outbound audio frame.
///
/// Every frame holds exactly [`FRAME_SAMPLES`] samples except the final
/// flush frame emitted at stream teardown, which may be shorter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// Base64-encoded little-endian PCM16 payload
    pub data: String,
    /// Number of samples encoded in `data`
    pub samples: usize,
}

/// Streaming resampler and frame encoder.
///
/// Maintains a carry-over buffer of unconsumed input so that no sample is
/// dropped or duplicated across push boundaries, whatever the caller's
/// buffer sizes are.
pub struct FrameEncoder {
    /// Input samples per output sample (`input_rate / 16000`)
    ratio: f64,
    /// Fractional read position into `carry`
    pos: f64,
    /// Unconsumed input samples from previous pushes
    carry: Vec<f32>,
    /// Resampled output waiting to fill a frame
    pending: Vec<f32>,
    passthrough: bool,
}

impl FrameEncoder {
    /// Create an encoder for a capture device running at `input_rate` Hz
    #[must_use]
    pub fn new(input_rate: u32) -> Self {
        let passthrough = input_rate == TARGET_SAMPLE_RATE;
        Self {
            ratio: f64::from(input_rate) / f64::from(TARGET_SAMPLE_RATE),
            pos: 0.0,
            carry: Vec::new(),
            pending: Vec::new(),
            passthrough,
        }
    }

    /// Feed captured samples, returning any frames completed by this push
    pub fn push(&mut self, input: &[f32]) -> Vec<AudioFrame> {
        if self.passthrough {
            self.pending.extend_from_slice(input);
        } else {
            self.resample(input);
        }
        self.drain_full_frames()
    }

    /// Flush buffered output at stream end.
    ///
    /// Returns the remaining partial data as one final shorter frame, or
    /// `None` if nothing is buffered. Trailing input samples that never
    /// reached a full interpolation step are discarded with the stream.
    pub fn flush(&mut self) -> Option<AudioFrame> {
        self.carry.clear();
        self.pos = 0.0;
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(encode_frame(&rest))
    }

    /// Linear interpolation at fractional positions spaced `ratio` apart
    fn resample(&mut self, input: &[f32]) {
        self.carry.extend_from_slice(input);

        let mut pos = self.pos;
        loop {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let i0 = pos.floor() as usize;
            if i0 + 1 >= self.carry.len() {
                break;
            }
            #[allow(clippy::cast_precision_loss)]
            let frac = pos - i0 as f64;
            let s = f64::from(self.carry[i0]).mul_add(1.0 - frac, f64::from(self.carry[i0 + 1]) * frac);
            #[allow(clippy::cast_possible_truncation)]
            self.pending.push(s as f32);
            pos += self.ratio;
        }

        // Retain everything from the next read position onward
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let consumed = (pos.floor() as usize).min(self.carry.len());
        self.carry.drain(..consumed);
        #[allow(clippy::cast_precision_loss)]
        {
            self.pos = pos - consumed as f64;
        }
    }

    fn drain_full_frames(&mut self) -> Vec<AudioFrame> {
        let mut frames = Vec::new();
        while self.pending.len() >= FRAME_SAMPLES {
            let frame: Vec<f32> = self.pending.drain(..FRAME_SAMPLES).collect();
            frames.push(encode_frame(&frame));
        }
        frames
    }
}

/// Clamp to [-1, 1], scale to i16 and base64-encode the LE bytes
fn encode_frame(samples: &[f32]) -> AudioFrame {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        #[allow(clippy::cast_possible_truncation)]
        let value = (f64::from(sample).clamp(-1.0, 1.0) * 32767.0) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    AudioFrame {
        data: BASE64.encode(&bytes),
        samples: samples.len(),
    }
}

/// Decode a base64 PCM16 payload back to f32 samples in [-1, 1]
///
/// # Errors
///
/// Returns error if the payload is not valid base64
pub fn decode_pcm16(data: &str) -> crate::Result<Vec<f32>> {
    let bytes = BASE64
        .decode(data)
        .map_err(|e| crate::Error::Protocol(format!("invalid base64 audio: {e}")))?;
    Ok(pcm16_bytes_to_f32(&bytes))
}

/// Convert raw little-endian PCM16 bytes to f32 samples in [-1, 1]
#[must_use]
pub fn pcm16_bytes_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect()
}
