//! Recording state machine
//!
//! [`AudioCaptureController`] moves between idle and recording. Entering
//! recording acquires the device; leaving it releases the device and folds the
//! delivered chunks, in arrival order, into one WAV clip.

use tokio::sync::mpsc;

use super::resample::resample;
use crate::{Error, Result};

/// MIME type of recorded clips
pub const WAV_MIME: &str = "audio/wav";

/// Chunks of mono `f32` samples delivered while a device is held
pub type ChunkReceiver = mpsc::UnboundedReceiver<Vec<f32>>;

/// A finished recording ready for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    /// Encoded audio bytes
    pub data: Vec<u8>,
    /// MIME type of `data`
    pub mime_type: String,
}

impl AudioClip {
    /// Create a clip from encoded bytes
    pub fn new(data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            data,
            mime_type: mime_type.into(),
        }
    }

    /// Whether nothing was captured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// File name used for multipart uploads
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("recording.{}", extension_for_mime(&self.mime_type))
    }
}

/// Get file extension for MIME type
fn extension_for_mime(mime_type: &str) -> &'static str {
    match mime_type {
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/mp4" | "audio/m4a" => "m4a",
        "audio/webm" => "webm",
        "audio/ogg" => "ogg",
        "audio/flac" => "flac",
        _ => "wav",
    }
}

/// Platform capture primitive
///
/// `acquire` either fails synchronously with [`Error::PermissionDenied`] /
/// [`Error::DeviceUnavailable`] or starts delivering chunks. After `release`
/// returns, no further chunks are sent.
pub trait CaptureDevice: Send {
    /// Acquire the device and start delivering chunks
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened
    fn acquire(&mut self) -> Result<ChunkReceiver>;

    /// Stop delivery and release the device
    fn release(&mut self);

    /// Sample rate of delivered chunks
    fn sample_rate(&self) -> u32;
}

enum CaptureState {
    Idle,
    Recording { chunks: ChunkReceiver },
}

/// Owns the record/stop state machine
pub struct AudioCaptureController {
    device: Box<dyn CaptureDevice>,
    clip_rate: u32,
    state: CaptureState,
}

impl AudioCaptureController {
    /// Create a controller producing clips at `clip_rate` Hz
    #[must_use]
    pub fn new(device: Box<dyn CaptureDevice>, clip_rate: u32) -> Self {
        Self {
            device,
            clip_rate,
            state: CaptureState::Idle,
        }
    }

    /// Check if currently recording
    #[must_use]
    pub const fn is_recording(&self) -> bool {
        matches!(self.state, CaptureState::Recording { .. })
    }

    /// Start recording; no-op if already recording
    ///
    /// # Errors
    ///
    /// Returns [`Error::PermissionDenied`] or [`Error::DeviceUnavailable`] if
    /// the device cannot be acquired
    pub fn start(&mut self) -> Result<()> {
        if self.is_recording() {
            return Ok(());
        }

        let chunks = self.device.acquire()?;
        self.state = CaptureState::Recording { chunks };

        tracing::info!("recording started");
        Ok(())
    }

    /// Stop recording and return the clip; `None` if not recording
    ///
    /// The device is released before the clip is assembled, whether or not
    /// encoding succeeds.
    ///
    /// # Errors
    ///
    /// Returns error if the captured audio cannot be encoded
    pub fn stop(&mut self) -> Result<Option<AudioClip>> {
        let CaptureState::Recording { mut chunks } =
            std::mem::replace(&mut self.state, CaptureState::Idle)
        else {
            return Ok(None);
        };

        self.device.release();

        let mut collected = Vec::new();
        while let Ok(chunk) = chunks.try_recv() {
            collected.push(chunk);
        }

        let clip = assemble_clip(&collected, self.device.sample_rate(), self.clip_rate)?;
        tracing::info!(
            chunks = collected.len(),
            clip_bytes = clip.data.len(),
            "recording stopped"
        );

        Ok(Some(clip))
    }
}

impl std::fmt::Debug for AudioCaptureController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioCaptureController")
            .field("recording", &self.is_recording())
            .field("clip_rate", &self.clip_rate)
            .finish_non_exhaustive()
    }
}

/// Fold chunks in arrival order into one WAV clip at `clip_rate`
///
/// No samples yields an empty clip.
///
/// # Errors
///
/// Returns error if resampling or WAV encoding fails
pub fn assemble_clip(chunks: &[Vec<f32>], device_rate: u32, clip_rate: u32) -> Result<AudioClip> {
    let total = chunks.iter().map(Vec::len).sum();
    let samples = chunks
        .iter()
        .fold(Vec::with_capacity(total), |mut acc, chunk| {
            acc.extend_from_slice(chunk);
            acc
        });

    if samples.is_empty() {
        return Ok(AudioClip::new(Vec::new(), WAV_MIME));
    }

    let samples = resample(&samples, device_rate, clip_rate)?;
    Ok(AudioClip::new(samples_to_wav(&samples, clip_rate)?, WAV_MIME))
}

/// Convert f32 samples to WAV bytes for upload
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            // Convert f32 [-1.0, 1.0] to i16
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Device that replays scripted chunks and counts acquire/release calls
    struct ScriptedDevice {
        chunks: Vec<Vec<f32>>,
        fail: Option<fn() -> Error>,
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    impl CaptureDevice for ScriptedDevice {
        fn acquire(&mut self) -> Result<ChunkReceiver> {
            self.calls.lock().unwrap().push("acquire");
            if let Some(fail) = self.fail {
                return Err(fail());
            }
            let (tx, rx) = mpsc::unbounded_channel();
            for chunk in &self.chunks {
                tx.send(chunk.clone()).unwrap();
            }
            Ok(rx)
        }

        fn release(&mut self) {
            self.calls.lock().unwrap().push("release");
        }

        fn sample_rate(&self) -> u32 {
            16000
        }
    }

    fn controller(
        chunks: Vec<Vec<f32>>,
        fail: Option<fn() -> Error>,
    ) -> (AudioCaptureController, Arc<Mutex<Vec<&'static str>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let device = ScriptedDevice {
            chunks,
            fail,
            calls: Arc::clone(&calls),
        };
        (AudioCaptureController::new(Box::new(device), 16000), calls)
    }

    #[test]
    fn test_start_stop_produces_wav() {
        let (mut capture, calls) = controller(vec![vec![0.1; 160], vec![-0.1; 160]], None);

        capture.start().unwrap();
        assert!(capture.is_recording());

        let clip = capture.stop().unwrap().unwrap();
        assert!(!capture.is_recording());
        assert_eq!(clip.mime_type, WAV_MIME);
        assert_eq!(&clip.data[0..4], b"RIFF");
        assert_eq!(*calls.lock().unwrap(), vec!["acquire", "release"]);

        let reader = hound::WavReader::new(std::io::Cursor::new(clip.data)).unwrap();
        assert_eq!(reader.len(), 320);
    }

    #[test]
    fn test_start_twice_is_noop() {
        let (mut capture, calls) = controller(vec![vec![0.2; 10]], None);
        capture.start().unwrap();
        capture.start().unwrap();
        assert_eq!(*calls.lock().unwrap(), vec!["acquire"]);
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let (mut capture, calls) = controller(vec![], None);
        assert!(capture.stop().unwrap().is_none());
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_acquire_failure_leaves_idle() {
        let (mut capture, _) = controller(
            vec![vec![0.2; 10]],
            Some(|| Error::PermissionDenied("microphone access refused".to_string())),
        );

        let err = capture.start().unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));
        assert!(!capture.is_recording());
        assert!(capture.stop().unwrap().is_none());
    }

    #[test]
    fn test_fold_preserves_arrival_order() {
        let clip = assemble_clip(&[vec![0.5], vec![-0.5], vec![0.25]], 16000, 16000).unwrap();
        let mut reader = hound::WavReader::new(std::io::Cursor::new(clip.data)).unwrap();
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();

        assert_eq!(samples.len(), 3);
        assert!(samples[0] > 0);
        assert!(samples[1] < 0);
        assert!(samples[2] > 0 && samples[2] < samples[0]);
    }

    #[test]
    fn test_no_chunks_gives_empty_clip() {
        let clip = assemble_clip(&[], 16000, 16000).unwrap();
        assert!(clip.is_empty());
        assert_eq!(clip.file_name(), "recording.wav");
    }

    #[test]
    fn test_extension_for_mime() {
        assert_eq!(extension_for_mime("audio/mpeg"), "mp3");
        assert_eq!(extension_for_mime("audio/webm"), "webm");
        assert_eq!(extension_for_mime("audio/wav"), "wav");
        assert_eq!(extension_for_mime("application/octet-stream"), "wav");
    }
}
