//! Sample-rate and channel conversion between device and clip formats

use rubato::{FftFixedIn, Resampler};

use crate::{Error, Result};

/// Requested frames per resampler call
const CHUNK_SIZE: usize = 1024;

/// Resample mono audio using rubato
///
/// The final partial chunk is zero-padded and the output trimmed back to the
/// expected length.
///
/// # Errors
///
/// Returns error if either rate is zero or the resampler fails
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    if from_rate == 0 || to_rate == 0 {
        return Err(Error::Audio(format!(
            "cannot resample from {from_rate} Hz to {to_rate} Hz"
        )));
    }

    let mut resampler =
        FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, CHUNK_SIZE, 2, 1)
            .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

    let input: Vec<f64> = samples.iter().map(|&s| f64::from(s)).collect();
    let expected =
        (samples.len() as f64 * f64::from(to_rate) / f64::from(from_rate)).round() as usize;
    let frames_per_call = resampler.input_frames_next();
    let mut output = Vec::with_capacity(expected + CHUNK_SIZE);

    for chunk in input.chunks(frames_per_call) {
        let mut frame = chunk.to_vec();
        frame.resize(frames_per_call, 0.0);
        let result = resampler
            .process(std::slice::from_ref(&frame), None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        output.extend(result[0].iter().map(|&s| s as f32));
    }

    output.truncate(expected);
    Ok(output)
}

/// Average interleaved frames down to mono
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }

    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_rate_is_identity() {
        let samples = vec![0.1, -0.2, 0.3];
        assert_eq!(resample(&samples, 16000, 16000).unwrap(), samples);
    }

    #[test]
    fn test_downsample_length() {
        let samples = vec![0.0f32; 48000];
        let out = resample(&samples, 48000, 16000).unwrap();
        assert!(out.len() <= 16000);
        assert!(out.len() > 15000);
    }

    #[test]
    fn test_downmix_stereo() {
        assert_eq!(downmix(&[1.0, 0.0, -0.5, -0.5], 2), vec![0.5, -0.5]);
        assert_eq!(downmix(&[0.25, 0.75], 1), vec![0.25, 0.75]);
    }

    #[test]
    fn test_zero_rate_rejected() {
        assert!(resample(&[0.5], 0, 16000).is_err());
    }
}
