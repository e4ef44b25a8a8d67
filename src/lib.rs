//! Murmur - voice and text chat client for a self-hosted inference backend
//!
//! This library provides the client side of a chat with a speech-capable
//! assistant:
//! - Backend readiness polling
//! - Microphone recording into WAV clips
//! - Text and audio exchanges over HTTP
//! - A conversation session that owns the transcript and reply playback
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  Presentation (CLI)                  │
//! └────────────────────┬────────────────────────────────┘
//!                      │ watch::Receiver<SessionState>
//! ┌────────────────────▼────────────────────────────────┐
//! │               ConversationSession                    │
//! │  StatusPoller │ AudioCaptureController │ AudioSink   │
//! └────────────────────┬────────────────────────────────┘
//!                      │ InferenceBackend
//! ┌────────────────────▼────────────────────────────────┐
//! │              Inference backend (HTTP)                │
//! │   chat  │  speech-to-text  │  text-to-speech        │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod session;
pub mod status;
pub mod voice;

pub use client::{HttpInferenceClient, InferenceBackend};
pub use config::Config;
pub use error::{BackendCause, BackendError, Error, Result};
pub use session::{
    ConversationId, ConversationSession, ExchangeOutcome, Message, RecordOutcome,
    SessionOptions, SessionState,
};
pub use status::{ApiStatus, StatusPoller};
