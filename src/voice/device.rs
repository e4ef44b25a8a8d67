//! Microphone access through cpal
//!
//! cpal streams are not `Send`, so each acquisition runs the input stream on a
//! dedicated thread. The thread reports whether the stream opened, then holds
//! it until released.

use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, Stream};
use tokio::sync::mpsc;

use super::capture::{CaptureDevice, ChunkReceiver};
use super::resample::downmix;
use crate::{Error, Result};

struct Worker {
    stop: std_mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Default input device of the default host
pub struct CpalMicrophone {
    preferred_rate: u32,
    stream_rate: u32,
    worker: Option<Worker>,
}

impl CpalMicrophone {
    /// Create a microphone preferring `preferred_rate` Hz mono input
    ///
    /// The device is not opened until [`CaptureDevice::acquire`].
    #[must_use]
    pub const fn new(preferred_rate: u32) -> Self {
        Self {
            preferred_rate,
            stream_rate: preferred_rate,
            worker: None,
        }
    }
}

impl CaptureDevice for CpalMicrophone {
    fn acquire(&mut self) -> Result<ChunkReceiver> {
        self.release();

        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<u32>>(1);
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let preferred_rate = self.preferred_rate;

        let handle = std::thread::Builder::new()
            .name("murmur-capture".to_string())
            .spawn(move || {
                let stream = match open_input(preferred_rate, chunk_tx) {
                    Ok((stream, rate)) => {
                        let _ = ready_tx.send(Ok(rate));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Blocks until release sends or drops the stop handle
                let _ = stop_rx.recv();
                drop(stream);
            })?;

        match ready_rx.recv() {
            Ok(Ok(rate)) => {
                self.stream_rate = rate;
                self.worker = Some(Worker {
                    stop: stop_tx,
                    handle,
                });
                tracing::debug!(sample_rate = rate, "microphone acquired");
                Ok(chunk_rx)
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(Error::DeviceUnavailable(
                    "capture thread exited before opening the device".to_string(),
                ))
            }
        }
    }

    fn release(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop.send(());
            if worker.handle.join().is_err() {
                tracing::warn!("capture thread panicked");
            }
            tracing::debug!("microphone released");
        }
    }

    fn sample_rate(&self) -> u32 {
        self.stream_rate
    }
}

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for CpalMicrophone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpalMicrophone")
            .field("preferred_rate", &self.preferred_rate)
            .field("stream_rate", &self.stream_rate)
            .field("acquired", &self.worker.is_some())
            .finish()
    }
}

/// Open and start the default input stream, forwarding mono chunks
fn open_input(
    preferred_rate: u32,
    chunks: mpsc::UnboundedSender<Vec<f32>>,
) -> Result<(Stream, u32)> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| Error::DeviceUnavailable("no input device available".to_string()))?;

    let configs: Vec<_> = device
        .supported_input_configs()
        .map_err(capture_error)?
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .collect();

    let supported = configs
        .iter()
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(preferred_rate)
                && c.max_sample_rate() >= SampleRate(preferred_rate)
        })
        .map(|c| c.clone().with_sample_rate(SampleRate(preferred_rate)))
        .or_else(|| {
            // Fallback: any f32 layout, downmixed and resampled later
            configs.first().map(|c| c.clone().with_max_sample_rate())
        })
        .ok_or_else(|| Error::DeviceUnavailable("no suitable input config found".to_string()))?;

    let config = supported.config();
    let channels = usize::from(config.channels);
    let rate = config.sample_rate.0;

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = rate,
        channels,
        "opening input stream"
    );

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let _ = chunks.send(downmix(data, channels));
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(capture_error)?;

    stream.play().map_err(capture_error)?;
    Ok((stream, rate))
}

/// Classify a platform audio error as refused permission or a missing device
fn capture_error(err: impl std::fmt::Display) -> Error {
    let message = err.to_string();
    let lowered = message.to_lowercase();

    if ["permission", "denied", "not authorized"]
        .iter()
        .any(|needle| lowered.contains(needle))
    {
        Error::PermissionDenied(message)
    } else {
        Error::DeviceUnavailable(message)
    }
}
