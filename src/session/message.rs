//! Conversation transcript entries

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque backend-issued handle correlating exchanges into one dialogue
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Wrap a backend-issued id; blank ids are treated as "no id"
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            None
        } else {
            Some(Self(id))
        }
    }

    /// The id as sent on the wire
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    /// The human user
    User,
    /// The assistant
    Bot,
}

/// Session-unique message identifier, increasing in append order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(pub u64);

/// One entry of the conversation transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Identifier used to target audio enrichment
    pub id: MessageId,
    /// Message text
    pub text: String,
    /// Author
    pub sender: Sender,
    /// Playable reply audio, attached at most once
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    /// Set for the generic message that stands in for a failed exchange
    pub is_error: bool,
}

impl Message {
    /// Message typed or spoken by the user
    pub fn user(id: MessageId, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
            sender: Sender::User,
            audio_url: None,
            is_error: false,
        }
    }

    /// Reply from the assistant
    pub fn bot(id: MessageId, text: impl Into<String>, audio_url: Option<String>) -> Self {
        Self {
            id,
            text: text.into(),
            sender: Sender::Bot,
            audio_url,
            is_error: false,
        }
    }

    /// Error placeholder shown in place of a reply
    pub fn error(id: MessageId, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
            sender: Sender::Bot,
            audio_url: None,
            is_error: true,
        }
    }

    /// Whether the user authored this message
    #[must_use]
    pub fn is_user(&self) -> bool {
        self.sender == Sender::User
    }
}
