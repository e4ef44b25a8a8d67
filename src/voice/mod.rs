//! Voice input and output
//!
//! Capture is a record/stop state machine over a [`CaptureDevice`]; the real
//! device is the default cpal microphone. Reply audio is played through an
//! [`AudioSink`].

mod capture;
mod device;
mod playback;
mod resample;
mod sink;

pub use capture::{
    AudioCaptureController, AudioClip, CaptureDevice, ChunkReceiver, WAV_MIME, assemble_clip,
    samples_to_wav,
};
pub use device::CpalMicrophone;
pub use playback::{AudioPlayback, DecodedAudio, decode_audio};
pub use resample::{downmix, resample};
pub use sink::{AudioSink, SilentSink, SpeakerSink};
