//! Sequential playback of synthesized agent audio
//!
//! Inbound audio payloads are queued and played strictly in arrival order by
//! a single consumer task; at most one playback is in flight at any time.
//! Playback failures are logged and skipped so the queue keeps draining.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleRate;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::audio::encoder::pcm16_bytes_to_f32;
use crate::protocol::AudioFormat;
use crate::{Error, Result};

/// One decoded audio payload queued for playback
#[derive(Debug, Clone)]
pub struct PlaybackItem {
    /// Raw payload bytes (MPEG container or raw PCM16)
    pub bytes: Vec<u8>,
    /// Declared payload format
    pub format: AudioFormat,
}

/// Something that can render samples to completion.
///
/// The device sink talks to real hardware; tests substitute a recording sink
/// to observe ordering without audio output.
#[async_trait]
pub trait AudioSink: Send {
    /// Play samples at the given rate, returning once playback completes
    async fn play(&mut self, samples: Vec<f32>, sample_rate: u32) -> Result<()>;
}

/// Cloneable producer side of the playback queue
#[derive(Debug, Clone)]
pub struct PlaybackHandle {
    tx: mpsc::UnboundedSender<PlaybackItem>,
}

impl PlaybackHandle {
    /// Append a payload to the queue. Never preempts active playback.
    pub fn enqueue(&self, item: PlaybackItem) {
        if self.tx.send(item).is_err() {
            tracing::debug!("playback queue closed, dropping payload");
        }
    }
}

/// FIFO playback queue with a single consumer task
pub struct PlaybackQueue {
    tx: mpsc::UnboundedSender<PlaybackItem>,
    task: JoinHandle<()>,
}

impl PlaybackQueue {
    /// Spawn the consumer task draining into `sink`
    #[must_use]
    pub fn spawn(mut sink: Box<dyn AudioSink>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<PlaybackItem>();
        let task = tokio::spawn(async move {
            while let Some(item) = rx.recv().await {
                if let Err(e) = play_item(sink.as_mut(), item).await {
                    tracing::warn!(error = %e, "playback failed, skipping item");
                }
            }
        });
        Self { tx, task }
    }

    /// Producer handle for enqueueing payloads
    #[must_use]
    pub fn handle(&self) -> PlaybackHandle {
        PlaybackHandle {
            tx: self.tx.clone(),
        }
    }

    /// Drain remaining items and stop the consumer
    pub async fn close(self) {
        let Self { tx, task } = self;
        drop(tx);
        let _ = task.await;
    }
}

/// Decode one payload and play it to completion
async fn play_item(sink: &mut dyn AudioSink, item: PlaybackItem) -> Result<()> {
    let (samples, sample_rate) = decode_item(&item)?;
    if samples.is_empty() {
        return Ok(());
    }
    sink.play(samples, sample_rate).await
}

/// Decode a payload into f32 samples and their sample rate
fn decode_item(item: &PlaybackItem) -> Result<(Vec<f32>, u32)> {
    match item.format {
        AudioFormat::Pcm16k => Ok((pcm16_bytes_to_f32(&item.bytes), 16_000)),
        AudioFormat::Mpeg => decode_mp3(&item.bytes),
    }
}

/// Decode MP3 bytes to mono f32 samples
fn decode_mp3(mp3_data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut decoder = minimp3::Decoder::new(std::io::Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0u32;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                #[allow(clippy::cast_sign_loss)]
                if sample_rate == 0 {
                    sample_rate = frame.sample_rate as u32;
                }
                if frame.channels == 2 {
                    // Stereo: average channels
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Playback(format!("MP3 decode error: {e}"))),
        }
    }

    if sample_rate == 0 {
        return Err(Error::Playback("no decodable MP3 frames".to_string()));
    }
    Ok((samples, sample_rate))
}

/// Plays to the default output device
pub struct DeviceSink;

#[async_trait]
impl AudioSink for DeviceSink {
    async fn play(&mut self, samples: Vec<f32>, sample_rate: u32) -> Result<()> {
        tokio::task::spawn_blocking(move || play_samples_blocking(samples, sample_rate))
            .await
            .map_err(|e| Error::Playback(format!("playback task failed: {e}")))?
    }
}

/// Open an output stream at the payload's rate and block until it drains
fn play_samples_blocking(samples: Vec<f32>, sample_rate: u32) -> Result<()> {
    if samples.is_empty() {
        return Ok(());
    }

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Playback("no output device available".to_string()))?;

    let supported = device
        .supported_output_configs()
        .map_err(|e| Error::Playback(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        })
        .or_else(|| {
            // Fallback: try stereo
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == 2
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
        })
        .ok_or_else(|| {
            Error::Playback(format!("no output config supports {sample_rate} Hz"))
        })?;

    let config = supported.with_sample_rate(SampleRate(sample_rate)).config();
    let channels = config.channels as usize;

    let samples = Arc::new(samples);
    let position = Arc::new(Mutex::new(0usize));
    let finished = Arc::new(Mutex::new(false));

    let samples_cb = Arc::clone(&samples);
    let position_cb = Arc::clone(&position);
    let finished_cb = Arc::clone(&finished);

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let Ok(mut pos) = position_cb.lock() else {
                    return;
                };
                for frame in data.chunks_mut(channels) {
                    let sample = if *pos < samples_cb.len() {
                        samples_cb[*pos]
                    } else {
                        if let Ok(mut done) = finished_cb.lock() {
                            *done = true;
                        }
                        0.0
                    };
                    for out in frame.iter_mut() {
                        *out = sample;
                    }
                    if *pos < samples_cb.len() {
                        *pos += 1;
                    }
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Playback(e.to_string()))?;

    stream.play().map_err(|e| Error::Playback(e.to_string()))?;

    let duration_ms = (samples.len() as u64 * 1000) / u64::from(sample_rate);
    let deadline = Instant::now() + Duration::from_millis(duration_ms + 500);

    while !finished.lock().map(|done| *done).unwrap_or(true) {
        if Instant::now() > deadline {
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    std::thread::sleep(Duration::from_millis(100));

    drop(stream);
    tracing::debug!(samples = samples.len(), sample_rate, "playback complete");
    Ok(())
}
