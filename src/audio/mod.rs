//! Audio pipeline
//!
//! Capture runs on its own thread and feeds the resampler/encoder; playback
//! drains a FIFO queue on the runtime. The session client owns both ends.

mod capture;
mod encoder;
mod playback;

pub use capture::AudioCapture;
pub use encoder::{AudioFrame, FrameEncoder, FRAME_SAMPLES, TARGET_SAMPLE_RATE};
pub use encoder::{decode_pcm16, pcm16_bytes_to_f32};
pub use playback::{AudioSink, DeviceSink, PlaybackHandle, PlaybackItem, PlaybackQueue};
