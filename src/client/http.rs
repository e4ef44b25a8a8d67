//! HTTP implementation of the inference backend client

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use url::Url;

use super::{
    AudioReply, ChatReply, HistoryEntry, InferenceBackend, LanguageFeedback, StatusReport,
    Synthesis,
};
use crate::config::BackendConfig;
use crate::error::BackendError;
use crate::session::ConversationId;
use crate::voice::AudioClip;
use crate::{Error, Result};

/// Client for the inference backend's HTTP API
#[derive(Debug, Clone)]
pub struct HttpInferenceClient {
    client: Client,
    base: Url,
}

#[derive(serde::Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    conversation_id: Option<&'a str>,
}

#[derive(serde::Serialize)]
struct TextRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    response: String,
    #[serde(default)]
    conversation_id: Option<String>,
}

#[derive(Deserialize)]
struct AudioConversationResponse {
    user_message: String,
    text_response: String,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    audio_url: Option<String>,
}

#[derive(Deserialize)]
struct SpeechResponse {
    #[serde(default)]
    audio_url: Option<String>,
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[derive(Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    messages: Vec<HistoryEntry>,
}

/// Any backend body may carry an `error` field
#[derive(Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: Option<String>,
}

impl HttpInferenceClient {
    /// Create a client for the configured backend
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        tracing::debug!(url = %config.url, "inference client initialized");

        Ok(Self {
            client,
            base: config.url.clone(),
        })
    }

    /// Resolve a backend-relative path (e.g. an `audio_url`) against the origin
    ///
    /// # Errors
    ///
    /// Returns error if the path cannot be joined onto the origin
    pub fn resolve(&self, path: &str) -> Result<Url> {
        self.base.join(path).map_err(Error::from)
    }

    fn endpoint(
        &self,
        operation: &'static str,
        path: &str,
    ) -> std::result::Result<Url, BackendError> {
        self.resolve(path)
            .map_err(|e| BackendError::transport(operation, e.to_string()))
    }

    /// Resolve an optional relative audio URL into an absolute one
    fn resolve_audio_url(
        &self,
        operation: &'static str,
        audio_url: Option<String>,
    ) -> std::result::Result<Option<String>, BackendError> {
        audio_url
            .filter(|u| !u.trim().is_empty())
            .map(|u| {
                self.resolve(&u)
                    .map(String::from)
                    .map_err(|e| BackendError::invalid_response(operation, e.to_string()))
            })
            .transpose()
    }

    async fn try_delete_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> std::result::Result<(), BackendError> {
        const OP: &str = "delete-conversation";
        let url = self.endpoint(OP, &Self::conversation_path(conversation_id))?;
        let response = send(OP, self.client.delete(url)).await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(failure(OP, status, &body))
    }

    fn conversation_path(id: &ConversationId) -> String {
        format!("/api/conversations/{}", urlencoding::encode(id.as_str()))
    }

    fn audio_part(
        operation: &'static str,
        clip: AudioClip,
    ) -> std::result::Result<Part, BackendError> {
        let file_name = clip.file_name();
        Part::bytes(clip.data)
            .file_name(file_name)
            .mime_str(&clip.mime_type)
            .map_err(|e| {
                BackendError::invalid_response(operation, format!("invalid MIME type: {e}"))
            })
    }
}

/// Send a prepared request, mapping network failures
async fn send(
    operation: &'static str,
    request: reqwest::RequestBuilder,
) -> std::result::Result<Response, BackendError> {
    request.send().await.map_err(|e| {
        tracing::error!(operation, error = %e, "backend request failed");
        BackendError::transport(operation, e.to_string())
    })
}

/// Build the error for a response that did not succeed
fn failure(operation: &'static str, status: StatusCode, body: &str) -> BackendError {
    declared_error(body).map_or_else(
        || BackendError::transport(operation, format!("HTTP {status}")),
        |message| BackendError::declared(operation, message),
    )
}

/// Extract a non-empty `error` field from a JSON body
fn declared_error(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.error)
        .filter(|message| !message.trim().is_empty())
}

/// Read a JSON body, treating a non-empty `error` field as failure regardless of status
async fn decode<T: DeserializeOwned>(
    operation: &'static str,
    response: Response,
) -> std::result::Result<T, BackendError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| BackendError::transport(operation, e.to_string()))?;

    tracing::debug!(operation, status = %status, "received response");

    if let Some(message) = declared_error(&body) {
        tracing::error!(operation, status = %status, error = %message, "backend reported error");
        return Err(BackendError::declared(operation, message));
    }

    if !status.is_success() {
        tracing::error!(operation, status = %status, body = %body, "backend error status");
        return Err(failure(operation, status, &body));
    }

    serde_json::from_str(&body).map_err(|e| {
        tracing::error!(operation, error = %e, "failed to parse response");
        BackendError::invalid_response(operation, e.to_string())
    })
}

/// Treat an empty conversation id as "none issued"
fn issued_id(raw: Option<String>) -> Option<ConversationId> {
    raw.and_then(ConversationId::new)
}

#[async_trait]
impl InferenceBackend for HttpInferenceClient {
    async fn status(&self) -> std::result::Result<StatusReport, BackendError> {
        const OP: &str = "status";
        let url = self.endpoint(OP, "/api/status")?;
        let response = send(OP, self.client.get(url)).await?;
        decode(OP, response).await
    }

    async fn send_text(
        &self,
        message: &str,
        conversation_id: Option<&ConversationId>,
    ) -> std::result::Result<ChatReply, BackendError> {
        const OP: &str = "chat";
        let url = self.endpoint(OP, "/api/chat")?;
        let request = ChatRequest {
            message,
            conversation_id: conversation_id.map(ConversationId::as_str),
        };

        tracing::debug!(
            chars = message.len(),
            conversation_id = ?request.conversation_id,
            "sending chat message"
        );

        let response = send(OP, self.client.post(url).json(&request)).await?;
        let body: ChatResponse = decode(OP, response).await?;

        Ok(ChatReply {
            response: body.response,
            conversation_id: issued_id(body.conversation_id),
        })
    }

    async fn send_audio(
        &self,
        clip: AudioClip,
        conversation_id: Option<&ConversationId>,
    ) -> std::result::Result<AudioReply, BackendError> {
        const OP: &str = "conversation-with-audio";
        let url = self.endpoint(OP, "/api/conversation-with-audio")?;

        tracing::debug!(
            audio_bytes = clip.data.len(),
            mime_type = %clip.mime_type,
            conversation_id = ?conversation_id,
            "uploading audio message"
        );

        let mut form = Form::new().part("audio", Self::audio_part(OP, clip)?);
        if let Some(id) = conversation_id {
            form = form.text("conversation_id", id.as_str().to_string());
        }

        let response = send(OP, self.client.post(url).multipart(form)).await?;
        let body: AudioConversationResponse = decode(OP, response).await?;

        tracing::info!(transcript = %body.user_message, "audio exchange complete");

        Ok(AudioReply {
            user_transcript: body.user_message,
            response: body.text_response,
            conversation_id: issued_id(body.conversation_id),
            audio_url: self.resolve_audio_url(OP, body.audio_url)?,
        })
    }

    async fn synthesize(&self, text: &str) -> std::result::Result<Synthesis, BackendError> {
        const OP: &str = "text-to-speech";
        let url = self.endpoint(OP, "/api/text-to-speech")?;
        let response = send(OP, self.client.post(url).json(&TextRequest { text })).await?;
        let body: SpeechResponse = decode(OP, response).await?;

        let audio_url = self.resolve_audio_url(OP, body.audio_url)?;
        if audio_url.is_none() {
            tracing::debug!("backend skipped synthesis");
        }

        Ok(Synthesis { audio_url })
    }

    async fn delete_conversation(&self, conversation_id: &ConversationId) {
        match self.try_delete_conversation(conversation_id).await {
            Ok(()) => {
                tracing::debug!(conversation_id = %conversation_id, "conversation deleted");
            }
            Err(e) => {
                let err = Error::Teardown(e);
                tracing::warn!(
                    conversation_id = %conversation_id,
                    error = %err,
                    "ignoring teardown failure"
                );
            }
        }
    }

    async fn fetch_audio(&self, audio_url: &str) -> std::result::Result<Vec<u8>, BackendError> {
        const OP: &str = "fetch-audio";
        let url = self.endpoint(OP, audio_url)?;
        let response = send(OP, self.client.get(url)).await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(failure(OP, status, &body));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| BackendError::transport(OP, e.to_string()))?;

        tracing::debug!(audio_bytes = audio.len(), "fetched audio");
        Ok(audio.to_vec())
    }

    async fn transcribe(&self, clip: AudioClip) -> std::result::Result<String, BackendError> {
        const OP: &str = "speech-to-text";
        let url = self.endpoint(OP, "/api/speech-to-text")?;
        let form = Form::new().part("audio", Self::audio_part(OP, clip)?);

        let response = send(OP, self.client.post(url).multipart(form)).await?;
        let body: TranscriptionResponse = decode(OP, response).await?;

        tracing::info!(transcript = %body.text, "transcription complete");
        Ok(body.text)
    }

    async fn conversation_history(
        &self,
        conversation_id: &ConversationId,
    ) -> std::result::Result<Vec<HistoryEntry>, BackendError> {
        const OP: &str = "conversation-history";
        let url = self.endpoint(OP, &Self::conversation_path(conversation_id))?;
        let response = send(OP, self.client.get(url)).await?;
        let body: HistoryResponse = decode(OP, response).await?;
        Ok(body.messages)
    }

    async fn language_feedback(
        &self,
        text: &str,
    ) -> std::result::Result<LanguageFeedback, BackendError> {
        const OP: &str = "language-feedback";
        let url = self.endpoint(OP, "/api/language-feedback")?;
        let response = send(OP, self.client.post(url).json(&TextRequest { text })).await?;
        decode(OP, response).await
    }
}
