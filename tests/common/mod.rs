//! Shared test utilities

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc};

use murmur::client::{
    AudioReply, ChatReply, HistoryEntry, InferenceBackend, LanguageFeedback, StatusReport,
    Synthesis,
};
use murmur::session::ConversationId;
use murmur::voice::{AudioCaptureController, AudioClip, AudioSink, CaptureDevice, ChunkReceiver};
use murmur::{BackendError, ConversationSession, Error, SessionOptions};

/// A backend call as seen by the fake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Status,
    SendText {
        message: String,
        conversation_id: Option<String>,
    },
    SendAudio {
        bytes: usize,
        conversation_id: Option<String>,
    },
    Synthesize(String),
    DeleteConversation(String),
    FetchAudio(String),
    Transcribe,
    History(String),
    Feedback(String),
}

/// In-memory backend with scripted replies
#[derive(Default)]
pub struct FakeBackend {
    calls: Mutex<Vec<Call>>,
    statuses: Mutex<VecDeque<Result<StatusReport, BackendError>>>,
    text_replies: Mutex<VecDeque<Result<ChatReply, BackendError>>>,
    audio_replies: Mutex<VecDeque<Result<AudioReply, BackendError>>>,
    synthesis: Mutex<Option<Result<Option<String>, String>>>,
    history: Mutex<Vec<HistoryEntry>>,
    gate: Mutex<Option<Arc<Notify>>>,
    status_delay: Mutex<Option<Duration>>,
    status_in_flight: AtomicUsize,
    max_status_in_flight: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn as_backend(self: &Arc<Self>) -> Arc<dyn InferenceBackend> {
        Arc::clone(self) as Arc<dyn InferenceBackend>
    }

    pub fn reply_text(&self, response: &str, conversation_id: Option<&str>) {
        self.text_replies.lock().unwrap().push_back(Ok(ChatReply {
            response: response.to_string(),
            conversation_id: conversation_id.and_then(ConversationId::new),
        }));
    }

    pub fn fail_text(&self, error: BackendError) {
        self.text_replies.lock().unwrap().push_back(Err(error));
    }

    pub fn reply_audio(
        &self,
        transcript: &str,
        response: &str,
        conversation_id: Option<&str>,
        audio_url: Option<&str>,
    ) {
        self.audio_replies.lock().unwrap().push_back(Ok(AudioReply {
            user_transcript: transcript.to_string(),
            response: response.to_string(),
            conversation_id: conversation_id.and_then(ConversationId::new),
            audio_url: audio_url.map(ToString::to_string),
        }));
    }

    pub fn fail_audio(&self, error: BackendError) {
        self.audio_replies.lock().unwrap().push_back(Err(error));
    }

    /// What every synthesize call returns; unset means "skipped"
    pub fn synthesize_to(&self, audio_url: Option<&str>) {
        *self.synthesis.lock().unwrap() = Some(Ok(audio_url.map(ToString::to_string)));
    }

    pub fn fail_synthesis(&self, message: &str) {
        *self.synthesis.lock().unwrap() = Some(Err(message.to_string()));
    }

    pub fn push_status(&self, status: Result<StatusReport, BackendError>) {
        self.statuses.lock().unwrap().push_back(status);
    }

    /// Make every status probe take `delay` to resolve
    pub fn slow_status(&self, delay: Duration) {
        *self.status_delay.lock().unwrap() = Some(delay);
    }

    /// Most status probes ever outstanding at once
    pub fn max_status_in_flight(&self) -> usize {
        self.max_status_in_flight.load(Ordering::SeqCst)
    }

    pub fn set_history(&self, entries: Vec<HistoryEntry>) {
        *self.history.lock().unwrap() = entries;
    }

    /// Hold text and audio exchanges until the returned handle is notified
    pub fn hold_exchanges(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| matches(c)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    async fn wait_at_gate(&self) {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
    }
}

pub fn loading() -> StatusReport {
    StatusReport {
        status: Some("operational".to_string()),
        models_loaded: Some(false),
    }
}

pub fn ready() -> StatusReport {
    StatusReport {
        status: Some("operational".to_string()),
        models_loaded: Some(true),
    }
}

#[async_trait]
impl InferenceBackend for FakeBackend {
    async fn status(&self) -> Result<StatusReport, BackendError> {
        self.record(Call::Status);

        let in_flight = self.status_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_status_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        let delay = *self.status_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.status_in_flight.fetch_sub(1, Ordering::SeqCst);

        self.statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ready()))
    }

    async fn send_text(
        &self,
        message: &str,
        conversation_id: Option<&ConversationId>,
    ) -> Result<ChatReply, BackendError> {
        self.record(Call::SendText {
            message: message.to_string(),
            conversation_id: conversation_id.map(ToString::to_string),
        });
        self.wait_at_gate().await;
        self.text_replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(BackendError::transport("chat", "no scripted reply")))
    }

    async fn send_audio(
        &self,
        clip: AudioClip,
        conversation_id: Option<&ConversationId>,
    ) -> Result<AudioReply, BackendError> {
        self.record(Call::SendAudio {
            bytes: clip.data.len(),
            conversation_id: conversation_id.map(ToString::to_string),
        });
        self.wait_at_gate().await;
        self.audio_replies.lock().unwrap().pop_front().unwrap_or_else(|| {
            Err(BackendError::transport(
                "conversation-with-audio",
                "no scripted reply",
            ))
        })
    }

    async fn synthesize(&self, text: &str) -> Result<Synthesis, BackendError> {
        self.record(Call::Synthesize(text.to_string()));
        match self.synthesis.lock().unwrap().clone() {
            Some(Ok(audio_url)) => Ok(Synthesis { audio_url }),
            Some(Err(message)) => Err(BackendError::declared("text-to-speech", message)),
            None => Ok(Synthesis::default()),
        }
    }

    async fn delete_conversation(&self, conversation_id: &ConversationId) {
        self.record(Call::DeleteConversation(conversation_id.to_string()));
    }

    async fn fetch_audio(&self, audio_url: &str) -> Result<Vec<u8>, BackendError> {
        self.record(Call::FetchAudio(audio_url.to_string()));
        Ok(Vec::new())
    }

    async fn transcribe(&self, _clip: AudioClip) -> Result<String, BackendError> {
        self.record(Call::Transcribe);
        Ok(String::new())
    }

    async fn conversation_history(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<HistoryEntry>, BackendError> {
        self.record(Call::History(conversation_id.to_string()));
        Ok(self.history.lock().unwrap().clone())
    }

    async fn language_feedback(&self, text: &str) -> Result<LanguageFeedback, BackendError> {
        self.record(Call::Feedback(text.to_string()));
        Ok(LanguageFeedback::default())
    }
}

/// Sink that remembers what it was asked to play
#[derive(Default)]
pub struct RecordingSink {
    played: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn played(&self) -> Vec<String> {
        self.played.lock().unwrap().clone()
    }
}

impl AudioSink for RecordingSink {
    fn play(&self, audio_url: &str) {
        self.played.lock().unwrap().push(audio_url.to_string());
    }
}

/// Capture device that delivers scripted chunks
pub struct FakeMicrophone {
    chunks: Vec<Vec<f32>>,
    denied: bool,
    opened: Option<Arc<AtomicBool>>,
    acquired: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl FakeMicrophone {
    pub fn with_chunks(chunks: Vec<Vec<f32>>) -> Self {
        Self {
            chunks,
            denied: false,
            opened: None,
            acquired: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Half a second of a quiet tone in 100 ms chunks
    pub fn speaking() -> Self {
        Self::with_chunks(vec![vec![0.1; 1600]; 5])
    }

    pub fn silent() -> Self {
        Self::with_chunks(Vec::new())
    }

    pub fn denied() -> Self {
        Self {
            denied: true,
            ..Self::silent()
        }
    }

    /// Acquire blocks its thread until the returned flag is raised, and
    /// fails if that takes longer than two seconds
    pub fn opening_slowly() -> (Self, Arc<AtomicBool>) {
        let opened = Arc::new(AtomicBool::new(false));
        let microphone = Self {
            opened: Some(Arc::clone(&opened)),
            ..Self::speaking()
        };
        (microphone, opened)
    }

    pub fn counters(&self) -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
        (Arc::clone(&self.acquired), Arc::clone(&self.released))
    }
}

impl CaptureDevice for FakeMicrophone {
    fn acquire(&mut self) -> murmur::Result<ChunkReceiver> {
        if self.denied {
            return Err(Error::PermissionDenied("microphone access refused".to_string()));
        }
        if let Some(opened) = &self.opened {
            let deadline = std::time::Instant::now() + Duration::from_secs(2);
            while !opened.load(Ordering::SeqCst) {
                if std::time::Instant::now() > deadline {
                    return Err(Error::DeviceUnavailable("device never opened".to_string()));
                }
                std::thread::sleep(Duration::from_millis(1));
            }
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = mpsc::unbounded_channel();
        for chunk in &self.chunks {
            tx.send(chunk.clone()).unwrap();
        }
        Ok(rx)
    }

    fn release(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }

    fn sample_rate(&self) -> u32 {
        16000
    }
}

/// Session over fakes with a short poll interval
pub fn session_with(
    backend: &Arc<FakeBackend>,
    microphone: FakeMicrophone,
    sink: &Arc<RecordingSink>,
) -> ConversationSession {
    let options = SessionOptions {
        poll_interval: Duration::from_millis(10),
        start_muted: false,
    };
    ConversationSession::new(
        backend.as_backend(),
        AudioCaptureController::new(Box::new(microphone), 16000),
        Arc::clone(sink) as Arc<dyn AudioSink>,
        options,
    )
}

/// Wait until `condition` holds, failing after a second
pub async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 1s");
}
