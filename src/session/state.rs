//! Observable session state

use super::message::{ConversationId, Message, MessageId};
use crate::status::ApiStatus;

/// Everything the presentation layer renders for one session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    /// Conversation held with the backend, absent before the first exchange
    pub conversation_id: Option<ConversationId>,
    /// Transcript in append order
    pub messages: Vec<Message>,
    /// Microphone is capturing
    pub is_recording: bool,
    /// Spoken replies are suppressed
    pub is_muted: bool,
    /// An exchange is in flight
    pub is_loading: bool,
    /// Backend readiness
    pub api_status: ApiStatus,
    next_message_id: u64,
    generation: u64,
}

impl SessionState {
    /// Fresh state, optionally muted
    #[must_use]
    pub fn new(is_muted: bool) -> Self {
        Self {
            is_muted,
            ..Self::default()
        }
    }

    /// Whether input should be disabled
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        self.is_loading || self.is_recording
    }

    /// Most recently appended message
    #[must_use]
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Look up a message by id
    #[must_use]
    pub fn message(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Counter bumped by every clear; exchanges started under an older value
    /// must not adopt a conversation id
    #[must_use]
    pub(crate) const fn generation(&self) -> u64 {
        self.generation
    }

    /// Append a message built with the next id
    pub(crate) fn push(&mut self, build: impl FnOnce(MessageId) -> Message) -> MessageId {
        let id = MessageId(self.next_message_id);
        self.next_message_id += 1;
        self.messages.push(build(id));
        id
    }

    /// Attach audio to a bot message that has none yet
    ///
    /// Returns false if the message was cleared or already has audio.
    pub(crate) fn attach_audio(&mut self, id: MessageId, audio_url: String) -> bool {
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(message) if message.audio_url.is_none() => {
                message.audio_url = Some(audio_url);
                true
            }
            _ => false,
        }
    }

    /// Adopt an id returned by an exchange started in `generation`
    pub(crate) fn adopt_conversation(&mut self, generation: u64, id: Option<ConversationId>) {
        if generation != self.generation {
            return;
        }
        if let Some(id) = id {
            self.conversation_id = Some(id);
        }
    }

    /// Drop the transcript and conversation id, returning the old id
    pub(crate) fn reset_conversation(&mut self) -> Option<ConversationId> {
        self.messages.clear();
        self.generation += 1;
        self.conversation_id.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_ids_increase_across_reset() {
        let mut state = SessionState::new(false);
        let first = state.push(|id| Message::user(id, "one"));
        state.reset_conversation();
        let second = state.push(|id| Message::user(id, "two"));

        assert!(second > first);
        assert_eq!(state.messages.len(), 1);
    }

    #[test]
    fn test_attach_audio_once() {
        let mut state = SessionState::new(false);
        let id = state.push(|id| Message::bot(id, "Hi!", None));

        assert!(state.attach_audio(id, "http://x/a.wav".to_string()));
        assert!(!state.attach_audio(id, "http://x/b.wav".to_string()));
        assert_eq!(
            state.message(id).and_then(|m| m.audio_url.as_deref()),
            Some("http://x/a.wav")
        );

        state.reset_conversation();
        assert!(!state.attach_audio(id, "http://x/c.wav".to_string()));
    }

    #[test]
    fn test_adopt_conversation_never_clears() {
        let mut state = SessionState::new(false);
        let generation = state.generation();
        state.adopt_conversation(generation, ConversationId::new("abc123"));
        state.adopt_conversation(generation, None);

        assert_eq!(
            state.conversation_id.as_ref().map(ConversationId::as_str),
            Some("abc123")
        );
    }

    #[test]
    fn test_stale_generation_ignored() {
        let mut state = SessionState::new(false);
        let generation = state.generation();
        assert!(state.reset_conversation().is_none());

        state.adopt_conversation(generation, ConversationId::new("old"));
        assert!(state.conversation_id.is_none());
    }

    #[test]
    fn test_busy() {
        let mut state = SessionState::new(true);
        assert!(state.is_muted);
        assert!(!state.is_busy());
        state.is_recording = true;
        assert!(state.is_busy());
    }
}
