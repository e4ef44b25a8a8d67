//! Conversation session
//!
//! [`ConversationSession`] is the single writer of [`SessionState`]. It runs
//! one exchange at a time against the backend, keeps the transcript in
//! arrival order and publishes every change as a whole snapshot through a
//! `watch` channel.
//!
//! A text exchange appends the user's message up front, then either the bot
//! reply or one generic error message. Unless muted, the reply is synthesized
//! and its audio attached to that same bot message. An audio exchange takes
//! the user's message from the backend transcript and uses the backend's own
//! reply audio.

mod message;
mod state;

pub use message::{ConversationId, Message, MessageId, Sender};
pub use state::SessionState;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard, watch};

use crate::client::{HistoryEntry, InferenceBackend, LanguageFeedback, Synthesis};
use crate::config::{Config, DEFAULT_POLL_INTERVAL};
use crate::error::BackendError;
use crate::status::{ApiStatus, StatusPoller};
use crate::voice::{AudioCaptureController, AudioClip, AudioSink};
use crate::{Error, Result};

/// Text of the message that stands in for a failed exchange
pub const EXCHANGE_ERROR_TEXT: &str = "Sorry, I encountered an error. Please try again.";

/// Session settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Delay between readiness probes while models load
    pub poll_interval: Duration,
    /// Whether spoken replies start suppressed
    pub start_muted: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            start_muted: false,
        }
    }
}

impl From<&Config> for SessionOptions {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: config.backend.poll_interval,
            start_muted: config.voice.start_muted,
        }
    }
}

/// What happened to a send request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// Nothing to send (blank text or empty clip)
    Skipped,
    /// Another exchange or a recording is in progress
    Busy,
    /// The bot reply was appended
    Replied,
    /// The exchange failed and the error message was appended
    Failed,
}

/// What a record toggle did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Recording started
    Started,
    /// Recording stopped and the clip went through an exchange
    Finished(ExchangeOutcome),
    /// An exchange is in flight; recording not started
    Busy,
}

/// One user's conversation with the backend
pub struct ConversationSession {
    backend: Arc<dyn InferenceBackend>,
    poller: StatusPoller,
    capture: Arc<Mutex<AudioCaptureController>>,
    sink: Arc<dyn AudioSink>,
    state: watch::Sender<SessionState>,
}

impl ConversationSession {
    /// Create a session over `backend`
    #[must_use]
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        capture: AudioCaptureController,
        sink: Arc<dyn AudioSink>,
        options: SessionOptions,
    ) -> Self {
        let poller = StatusPoller::new(Arc::clone(&backend), options.poll_interval);
        let (state, _) = watch::channel(SessionState::new(options.start_muted));

        Self {
            backend,
            poller,
            capture: Arc::new(Mutex::new(capture)),
            sink,
            state,
        }
    }

    /// Receive every published state snapshot
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Copy of the current state
    #[must_use]
    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Backend the session talks to
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn InferenceBackend> {
        &self.backend
    }

    /// Wait for the backend to settle on ready or error
    ///
    /// Every observed status is mirrored into `api_status`. Calling this again
    /// after an error retries from `checking`.
    pub async fn check_backend(&self) -> ApiStatus {
        self.poller
            .poll(|status| self.update(|s| s.api_status = status))
            .await
    }

    /// Send typed text
    ///
    /// Surrounding whitespace is trimmed; blank text is skipped without a
    /// network call.
    pub async fn send_text_message(&self, text: &str) -> ExchangeOutcome {
        let text = text.trim();
        if text.is_empty() {
            return ExchangeOutcome::Skipped;
        }

        let started = self.update(|s| {
            if s.is_busy() {
                return None;
            }
            s.push(|id| Message::user(id, text));
            s.is_loading = true;
            Some((s.generation(), s.conversation_id.clone()))
        });
        let Some((generation, conversation_id)) = started else {
            tracing::debug!("exchange in progress, ignoring text message");
            return ExchangeOutcome::Busy;
        };

        tracing::debug!(chars = text.len(), "sending text message");

        let outcome = match self.backend.send_text(text, conversation_id.as_ref()).await {
            Ok(reply) => {
                let (bot_id, muted) = self.update(|s| {
                    s.adopt_conversation(generation, reply.conversation_id);
                    let id = s.push(|id| Message::bot(id, reply.response.as_str(), None));
                    (id, s.is_muted)
                });

                if !muted {
                    self.speak_reply(bot_id, &reply.response).await;
                }
                ExchangeOutcome::Replied
            }
            Err(e) => {
                self.record_failure(&e);
                ExchangeOutcome::Failed
            }
        };

        self.update(|s| s.is_loading = false);
        outcome
    }

    /// Send a recorded clip
    ///
    /// Empty clips are skipped without a network call.
    pub async fn send_audio_message(&self, clip: AudioClip) -> ExchangeOutcome {
        if clip.is_empty() {
            return ExchangeOutcome::Skipped;
        }

        let started = self.update(|s| {
            if s.is_busy() {
                return None;
            }
            s.is_loading = true;
            Some((s.generation(), s.conversation_id.clone()))
        });
        let Some((generation, conversation_id)) = started else {
            tracing::debug!("exchange in progress, ignoring audio message");
            return ExchangeOutcome::Busy;
        };

        self.exchange_audio(clip, generation, conversation_id).await
    }

    /// Start recording, or stop and send the recording
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::PermissionDenied`] or
    /// [`crate::Error::DeviceUnavailable`] if the microphone cannot be
    /// acquired, or an audio error if the clip cannot be encoded. History is
    /// unchanged in both cases.
    pub async fn record_toggle(&self) -> Result<RecordOutcome> {
        let capture = Arc::clone(&self.capture).lock_owned().await;

        if !capture.is_recording() {
            let reserved = self.update(|s| {
                if s.is_loading {
                    return false;
                }
                s.is_recording = true;
                true
            });
            if !reserved {
                return Ok(RecordOutcome::Busy);
            }

            if let Err(e) = run_capture(capture, AudioCaptureController::start).await {
                self.update(|s| s.is_recording = false);
                tracing::warn!(error = %e, "could not start recording");
                return Err(e);
            }
            return Ok(RecordOutcome::Started);
        }

        let stopped = run_capture(capture, AudioCaptureController::stop).await;

        let clip = match stopped {
            Ok(Some(clip)) if !clip.is_empty() => clip,
            Ok(_) => {
                self.update(|s| s.is_recording = false);
                tracing::info!("recording produced no audio");
                return Ok(RecordOutcome::Finished(ExchangeOutcome::Skipped));
            }
            Err(e) => {
                self.update(|s| s.is_recording = false);
                return Err(e);
            }
        };

        let (generation, conversation_id) = self.update(|s| {
            s.is_recording = false;
            s.is_loading = true;
            (s.generation(), s.conversation_id.clone())
        });

        let outcome = self.exchange_audio(clip, generation, conversation_id).await;
        Ok(RecordOutcome::Finished(outcome))
    }

    /// Drop the transcript and forget the conversation
    ///
    /// The server-side conversation is deleted in the background. An exchange
    /// still in flight lands in the fresh history without reviving the old id.
    pub fn clear(&self) {
        let previous = self.update(SessionState::reset_conversation);
        tracing::info!("conversation cleared");

        if let Some(conversation_id) = previous {
            self.spawn_teardown(conversation_id);
        }
    }

    /// Flip mute and return the new value
    pub fn toggle_mute(&self) -> bool {
        let muted = self.update(|s| {
            s.is_muted = !s.is_muted;
            s.is_muted
        });
        tracing::debug!(muted, "mute toggled");
        muted
    }

    /// Server-side history of the current conversation; empty if none is held
    ///
    /// # Errors
    ///
    /// Returns error if the backend request fails
    pub async fn server_history(&self) -> Result<Vec<HistoryEntry>> {
        let conversation_id = self.state.borrow().conversation_id.clone();
        let Some(conversation_id) = conversation_id else {
            return Ok(Vec::new());
        };

        Ok(self.backend.conversation_history(&conversation_id).await?)
    }

    /// Feedback on the user's language usage in `text`
    ///
    /// # Errors
    ///
    /// Returns error if the backend request fails
    pub async fn language_feedback(&self, text: &str) -> Result<LanguageFeedback> {
        Ok(self.backend.language_feedback(text.trim()).await?)
    }

    async fn exchange_audio(
        &self,
        clip: AudioClip,
        generation: u64,
        conversation_id: Option<ConversationId>,
    ) -> ExchangeOutcome {
        tracing::debug!(bytes = clip.data.len(), "sending audio message");

        let outcome = match self.backend.send_audio(clip, conversation_id.as_ref()).await {
            Ok(reply) => {
                let muted = self.update(|s| {
                    s.adopt_conversation(generation, reply.conversation_id);
                    s.push(|id| Message::user(id, reply.user_transcript.as_str()));
                    s.push(|id| Message::bot(id, reply.response.as_str(), reply.audio_url.clone()));
                    s.is_muted
                });

                if let Some(audio_url) = reply.audio_url.as_deref()
                    && !muted
                {
                    self.sink.play(audio_url);
                }
                ExchangeOutcome::Replied
            }
            Err(e) => {
                self.record_failure(&e);
                ExchangeOutcome::Failed
            }
        };

        self.update(|s| s.is_loading = false);
        outcome
    }

    /// Synthesize a text reply and attach the audio to its message
    async fn speak_reply(&self, message_id: MessageId, text: &str) {
        match self.backend.synthesize(text).await {
            Ok(Synthesis {
                audio_url: Some(audio_url),
            }) => {
                if self.update(|s| s.attach_audio(message_id, audio_url.clone())) {
                    self.sink.play(&audio_url);
                }
            }
            Ok(Synthesis { audio_url: None }) => {
                tracing::debug!("synthesis skipped by backend");
            }
            Err(e) => {
                tracing::warn!(error = %e, "reply synthesis failed");
            }
        }
    }

    fn record_failure(&self, error: &BackendError) {
        tracing::error!(error = %error, "exchange failed");
        self.update(|s| s.push(|id| Message::error(id, EXCHANGE_ERROR_TEXT)));
    }

    fn spawn_teardown(&self, conversation_id: ConversationId) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let backend = Arc::clone(&self.backend);
                handle.spawn(async move {
                    backend.delete_conversation(&conversation_id).await;
                });
            }
            Err(_) => {
                tracing::warn!(
                    %conversation_id,
                    "no async runtime, skipping conversation teardown"
                );
            }
        }
    }

    /// Mutate state and publish the new snapshot
    fn update<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut output = None;
        self.state.send_modify(|state| output = Some(f(state)));
        output.unwrap_or_else(|| unreachable!("send_modify runs its closure exactly once"))
    }
}

/// Run a capture step on the blocking pool
///
/// Device hand-off and clip assembly block; the guard travels with the step
/// so the controller stays locked until it finishes.
async fn run_capture<T: Send + 'static>(
    mut capture: OwnedMutexGuard<AudioCaptureController>,
    step: fn(&mut AudioCaptureController) -> Result<T>,
) -> Result<T> {
    tokio::task::spawn_blocking(move || step(&mut capture))
        .await
        .map_err(|e| Error::Audio(format!("capture task failed: {e}")))?
}

impl std::fmt::Debug for ConversationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationSession")
            .field("poller", &self.poller)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}
