//! Audio playback to speakers

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, StreamConfig};

use super::resample::{downmix, resample};
use crate::{Error, Result};

/// Preferred output rate (matches common TTS output)
const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Decoded mono audio
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    /// Mono samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Sample rate of `samples`
    pub sample_rate: u32,
}

/// Plays audio to the default output device
pub struct AudioPlayback {
    device: Device,
    config: StreamConfig,
}

impl AudioPlayback {
    /// Create a new audio playback instance
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let preferred = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .filter(|c| c.sample_format() == SampleFormat::F32 && c.channels() <= 2)
            .find(|c| {
                c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
            })
            .map(|c| c.with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE)));

        let supported = match preferred {
            Some(config) => config,
            None => device
                .default_output_config()
                .map_err(|e| Error::Audio(format!("no suitable output config found: {e}")))?,
        };
        let config = supported.config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self { device, config })
    }

    /// Output sample rate
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    /// Decode WAV or MP3 bytes and play them, blocking until done
    ///
    /// # Errors
    ///
    /// Returns error if decoding or playback fails
    pub fn play_encoded(&self, bytes: &[u8]) -> Result<()> {
        let decoded = decode_audio(bytes)?;
        let samples = resample(&decoded.samples, decoded.sample_rate, self.sample_rate())?;
        self.play(&samples)
    }

    /// Play mono samples at the output rate, blocking until done
    ///
    /// # Errors
    ///
    /// Returns error if the output stream cannot be started
    pub fn play(&self, samples: &[f32]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let channels = usize::from(self.config.channels);
        let samples: Arc<[f32]> = Arc::from(samples);
        let finished = Arc::new(AtomicBool::new(false));

        let stream = {
            let samples = Arc::clone(&samples);
            let finished = Arc::clone(&finished);
            let mut pos = 0_usize;

            self.device
                .build_output_stream(
                    &self.config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        for frame in data.chunks_mut(channels) {
                            let sample = samples.get(pos).copied().unwrap_or_else(|| {
                                finished.store(true, Ordering::Release);
                                0.0
                            });
                            frame.fill(sample);

                            if pos < samples.len() {
                                pos += 1;
                            }
                        }
                    },
                    |err| {
                        tracing::error!(error = %err, "audio playback error");
                    },
                    None,
                )
                .map_err(|e| Error::Audio(e.to_string()))?
        };

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        // Wait for playback to finish
        let duration_ms = (samples.len() as u64 * 1000) / u64::from(self.sample_rate().max(1));
        let timeout = Duration::from_millis(duration_ms + 500);
        let start = Instant::now();

        while !finished.load(Ordering::Acquire) {
            if start.elapsed() > timeout {
                tracing::warn!("playback did not drain before timeout");
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }

        // Small delay to ensure audio finishes
        std::thread::sleep(Duration::from_millis(100));

        drop(stream);
        tracing::debug!(samples = samples.len(), "playback complete");

        Ok(())
    }
}

impl std::fmt::Debug for AudioPlayback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioPlayback")
            .field("sample_rate", &self.config.sample_rate.0)
            .field("channels", &self.config.channels)
            .finish_non_exhaustive()
    }
}

/// Decode a WAV or MP3 payload to mono samples
///
/// RIFF data is read as WAV; anything else is treated as MP3.
///
/// # Errors
///
/// Returns error if the payload cannot be decoded
pub fn decode_audio(bytes: &[u8]) -> Result<DecodedAudio> {
    if bytes.starts_with(b"RIFF") {
        decode_wav(bytes)
    } else {
        decode_mp3(bytes)
    }
}

#[allow(clippy::cast_precision_loss)]
fn decode_wav(bytes: &[u8]) -> Result<DecodedAudio> {
    let wav_error = |e: hound::Error| Error::Audio(format!("WAV decode error: {e}"));

    let mut reader = hound::WavReader::new(Cursor::new(bytes)).map_err(wav_error)?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(wav_error)?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(wav_error)?
        }
    };

    Ok(DecodedAudio {
        samples: downmix(&interleaved, usize::from(spec.channels)),
        sample_rate: spec.sample_rate,
    })
}

/// Decode MP3 bytes to f32 samples
fn decode_mp3(mp3_data: &[u8]) -> Result<DecodedAudio> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = None;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if sample_rate.is_none() {
                    sample_rate = u32::try_from(frame.sample_rate).ok();
                }

                let pcm: Vec<f32> = frame.data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                samples.extend(downmix(&pcm, frame.channels));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    let sample_rate =
        sample_rate.ok_or_else(|| Error::Audio("MP3 payload has no frames".to_string()))?;

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::samples_to_wav;

    #[test]
    fn test_decode_wav_int() {
        let wav = samples_to_wav(&[0.5, -0.5, 0.0], 22050).unwrap();
        let decoded = decode_audio(&wav).unwrap();

        assert_eq!(decoded.sample_rate, 22050);
        assert_eq!(decoded.samples.len(), 3);
        assert!((decoded.samples[0] - 0.5).abs() < 0.001);
        assert!((decoded.samples[1] + 0.5).abs() < 0.001);
    }

    #[test]
    fn test_decode_wav_stereo_downmix() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for s in [1.0f32, 0.0, 0.5, 0.5] {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }

        let decoded = decode_audio(&cursor.into_inner()).unwrap();
        assert_eq!(decoded.samples, vec![0.5, 0.5]);
        assert_eq!(decoded.sample_rate, 8000);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(decode_audio(b"definitely not audio").is_err());
        assert!(decode_audio(b"RIFF....").is_err());
    }
}
