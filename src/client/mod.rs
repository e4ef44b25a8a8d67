//! Inference backend client
//!
//! Every operation is a single stateless request/response exchange. The
//! [`InferenceBackend`] trait is the seam the session and status poller talk
//! to; [`HttpInferenceClient`] is the real implementation over HTTP.

mod http;

pub use http::HttpInferenceClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::session::ConversationId;
use crate::voice::AudioClip;

/// Result of a readiness probe
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StatusReport {
    /// Free-form service status (e.g. "operational")
    #[serde(default)]
    pub status: Option<String>,
    /// Whether the backend finished loading its models; absent while starting
    #[serde(default)]
    pub models_loaded: Option<bool>,
}

/// Reply to a text exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    /// Bot reply text
    pub response: String,
    /// Conversation the exchange belongs to, if the backend returned one
    pub conversation_id: Option<ConversationId>,
}

/// Reply to an audio exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioReply {
    /// Transcript of the uploaded clip, shown as the user's message
    pub user_transcript: String,
    /// Bot reply text
    pub response: String,
    /// Conversation the exchange belongs to, if the backend returned one
    pub conversation_id: Option<ConversationId>,
    /// Absolute URL of the spoken reply produced server-side
    pub audio_url: Option<String>,
}

/// Result of a text-to-speech request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Synthesis {
    /// Absolute URL of the synthesized clip; `None` means synthesis was skipped
    pub audio_url: Option<String>,
}

/// One turn of a server-side conversation history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// "user" or "assistant"
    pub role: String,
    /// Turn text
    pub content: String,
}

/// Language usage feedback for a piece of user text
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LanguageFeedback {
    /// Grammar score out of 10
    #[serde(default)]
    pub grammar_score: f32,
    /// Vocabulary score out of 10
    #[serde(default)]
    pub vocabulary_score: f32,
    /// Fluency score out of 10
    #[serde(default)]
    pub fluency_score: f32,
    /// Improvement suggestions
    #[serde(default)]
    pub suggestions: Vec<String>,
    /// Corrected version of the analysed text
    #[serde(default)]
    pub corrected_text: String,
}

/// Request/response operations offered by the inference backend
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Probe backend readiness
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be reached
    async fn status(&self) -> Result<StatusReport, BackendError>;

    /// Send a text message and get the bot's reply
    ///
    /// # Errors
    ///
    /// Returns error on transport failure or a backend-declared error
    async fn send_text(
        &self,
        message: &str,
        conversation_id: Option<&ConversationId>,
    ) -> Result<ChatReply, BackendError>;

    /// Upload a recorded clip; the backend transcribes it and replies
    ///
    /// # Errors
    ///
    /// Returns error on transport failure or a backend-declared error
    async fn send_audio(
        &self,
        clip: AudioClip,
        conversation_id: Option<&ConversationId>,
    ) -> Result<AudioReply, BackendError>;

    /// Request text-to-speech for `text`
    ///
    /// # Errors
    ///
    /// Returns error on transport failure or a backend-declared error
    async fn synthesize(&self, text: &str) -> Result<Synthesis, BackendError>;

    /// Delete a server-side conversation
    ///
    /// Best-effort: failures are logged by the implementation, never returned.
    async fn delete_conversation(&self, conversation_id: &ConversationId);

    /// Download a synthesized clip for playback
    ///
    /// # Errors
    ///
    /// Returns error if the clip cannot be fetched
    async fn fetch_audio(&self, audio_url: &str) -> Result<Vec<u8>, BackendError>;

    /// Transcribe a clip without starting an exchange
    ///
    /// # Errors
    ///
    /// Returns error on transport failure or a backend-declared error
    async fn transcribe(&self, clip: AudioClip) -> Result<String, BackendError>;

    /// Fetch the server-side history of a conversation
    ///
    /// # Errors
    ///
    /// Returns error on transport failure or if the conversation is unknown
    async fn conversation_history(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<HistoryEntry>, BackendError>;

    /// Ask for feedback on the user's language usage
    ///
    /// # Errors
    ///
    /// Returns error on transport failure or a backend-declared error
    async fn language_feedback(&self, text: &str) -> Result<LanguageFeedback, BackendError>;
}
