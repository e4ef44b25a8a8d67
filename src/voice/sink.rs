//! Where reply audio goes once an exchange attaches it

use std::sync::Arc;

use tokio::sync::mpsc;

use super::playback::AudioPlayback;
use crate::client::InferenceBackend;
use crate::{Error, Result};

/// Receives reply audio URLs that should be spoken
///
/// `play` must not block the caller; failures are the sink's to log.
pub trait AudioSink: Send + Sync {
    /// Queue `audio_url` for playback
    fn play(&self, audio_url: &str);
}

/// Discards everything; used when voice is disabled
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentSink;

impl AudioSink for SilentSink {
    fn play(&self, audio_url: &str) {
        tracing::trace!(audio_url, "voice disabled, skipping playback");
    }
}

/// Fetches reply clips and plays them on the default speaker, one at a time
#[derive(Debug, Clone)]
pub struct SpeakerSink {
    queue: mpsc::UnboundedSender<String>,
}

impl SpeakerSink {
    /// Spawn the playback task on the current runtime
    #[must_use]
    pub fn spawn(backend: Arc<dyn InferenceBackend>) -> Self {
        let (queue, mut rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            tracing::debug!("speaker playback task started");

            while let Some(audio_url) = rx.recv().await {
                if let Err(e) = fetch_and_play(backend.as_ref(), &audio_url).await {
                    tracing::warn!(error = %e, audio_url = %audio_url, "reply playback failed");
                }
            }

            tracing::debug!("speaker playback task stopped");
        });

        Self { queue }
    }
}

impl AudioSink for SpeakerSink {
    fn play(&self, audio_url: &str) {
        if self.queue.send(audio_url.to_string()).is_err() {
            tracing::warn!(audio_url, "playback task gone, dropping reply audio");
        }
    }
}

async fn fetch_and_play(backend: &dyn InferenceBackend, audio_url: &str) -> Result<()> {
    let bytes = backend.fetch_audio(audio_url).await?;
    tracing::debug!(bytes = bytes.len(), "playing reply audio");

    tokio::task::spawn_blocking(move || AudioPlayback::new()?.play_encoded(&bytes))
        .await
        .map_err(|e| Error::Audio(format!("playback task failed: {e}")))?
}
