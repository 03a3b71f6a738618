//! Audio capture from microphone
//!
//! The cpal stream is `!Send`, so capture runs on a dedicated thread that
//! owns the device stream for its whole lifetime. The capture callback feeds
//! the [`FrameEncoder`] and pushes completed frames over an unbounded channel;
//! the audio thread never waits on the session task.

use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig};
use tokio::sync::mpsc;

use crate::audio::encoder::{AudioFrame, FrameEncoder};
use crate::{Error, Result};

/// Captures microphone audio and emits encoded frames.
///
/// The microphone resource is held for the lifetime of this value; dropping
/// it (or calling [`AudioCapture::stop`]) releases the device and flushes the
/// final partial frame into the frame channel.
pub struct AudioCapture {
    stop_tx: Option<std_mpsc::Sender<()>>,
    join: Option<std::thread::JoinHandle<()>>,
    sample_rate: u32,
}

impl AudioCapture {
    /// Acquire the default input device and start capturing.
    ///
    /// Completed frames are delivered through `frames` in capture order.
    ///
    /// # Errors
    ///
    /// Returns `Error::Audio` if no input device is available or the stream
    /// cannot be opened (including host-level microphone denial). This is
    /// fatal to starting a session and distinct from transport failures.
    pub fn start(frames: mpsc::UnboundedSender<AudioFrame>) -> Result<Self> {
        let (stop_tx, stop_rx) = std_mpsc::channel();
        let (ready_tx, ready_rx) = std_mpsc::channel();

        let join = std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || capture_thread(&frames, &stop_rx, &ready_tx))
            .map_err(|e| Error::Audio(format!("failed to spawn capture thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(sample_rate)) => Ok(Self {
                stop_tx: Some(stop_tx),
                join: Some(join),
                sample_rate,
            }),
            Ok(Err(e)) => {
                let _ = join.join();
                Err(e)
            }
            Err(_) => {
                let _ = join.join();
                Err(Error::Audio(
                    "capture thread exited before opening the device".to_string(),
                ))
            }
        }
    }

    /// Stop capturing and release the microphone.
    ///
    /// Blocks briefly while the capture thread drops the stream and flushes
    /// the final partial frame. Idempotent.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }

    /// Native sample rate of the capture device
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Owns the cpal stream; parks until stopped, then flushes the encoder
fn capture_thread(
    frames: &mpsc::UnboundedSender<AudioFrame>,
    stop_rx: &std_mpsc::Receiver<()>,
    ready_tx: &std_mpsc::Sender<Result<u32>>,
) {
    let (device, config, sample_format) = match open_input_device() {
        Ok(parts) => parts,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let sample_rate = config.sample_rate.0;
    let channels = config.channels as usize;
    let encoder = Arc::new(Mutex::new(FrameEncoder::new(sample_rate)));

    let stream = match build_stream(&device, &config, sample_format, channels, &encoder, frames) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(Error::Audio(e.to_string())));
        return;
    }

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate,
        channels,
        "audio capture started"
    );
    let _ = ready_tx.send(Ok(sample_rate));

    // Park until stop is requested or the owner is dropped
    let _ = stop_rx.recv();
    drop(stream);

    // Final partial frame is flushed rather than discarded
    if let Ok(mut enc) = encoder.lock() {
        if let Some(frame) = enc.flush() {
            let _ = frames.send(frame);
        }
    }

    tracing::debug!("audio capture stopped");
}

fn open_input_device() -> Result<(Device, StreamConfig, SampleFormat)> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

    let supported = device
        .default_input_config()
        .map_err(|e| Error::Audio(format!("cannot open input device: {e}")))?;

    let sample_format = supported.sample_format();
    let config = supported.config();
    Ok((device, config, sample_format))
}

/// Build the input stream for whatever sample format the device speaks
fn build_stream(
    device: &Device,
    config: &StreamConfig,
    sample_format: SampleFormat,
    channels: usize,
    encoder: &Arc<Mutex<FrameEncoder>>,
    frames: &mpsc::UnboundedSender<AudioFrame>,
) -> Result<cpal::Stream> {
    let err_fn = |err| {
        tracing::error!(error = %err, "audio capture error");
    };

    let stream = match sample_format {
        SampleFormat::F32 => {
            let encoder = Arc::clone(encoder);
            let frames = frames.clone();
            device.build_input_stream(
                config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    feed(&encoder, &frames, channels, data.iter().copied());
                },
                err_fn,
                None,
            )
        }
        SampleFormat::I16 => {
            let encoder = Arc::clone(encoder);
            let frames = frames.clone();
            device.build_input_stream(
                config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    feed(
                        &encoder,
                        &frames,
                        channels,
                        data.iter().map(|&s| f32::from(s) / 32768.0),
                    );
                },
                err_fn,
                None,
            )
        }
        SampleFormat::U16 => {
            let encoder = Arc::clone(encoder);
            let frames = frames.clone();
            device.build_input_stream(
                config,
                move |data: &[u16], _: &cpal::InputCallbackInfo| {
                    feed(
                        &encoder,
                        &frames,
                        channels,
                        data.iter().map(|&s| f32::from(s) / 32768.0 - 1.0),
                    );
                },
                err_fn,
                None,
            )
        }
        other => {
            return Err(Error::Audio(format!(
                "unsupported capture sample format: {other:?}"
            )));
        }
    };

    stream.map_err(|e| Error::Audio(e.to_string()))
}

/// Downmix to the first channel, resample, and forward completed frames
fn feed(
    encoder: &Arc<Mutex<FrameEncoder>>,
    frames: &mpsc::UnboundedSender<AudioFrame>,
    channels: usize,
    samples: impl Iterator<Item = f32>,
) {
    let mono: Vec<f32> = samples.step_by(channels.max(1)).collect();
    let Ok(mut enc) = encoder.lock() else {
        return;
    };
    for frame in enc.push(&mono) {
        // Receiver gone means the session is tearing down; drop silently
        let _ = frames.send(frame);
    }
}
