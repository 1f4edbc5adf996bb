//! Slack Events API payloads.

use serde::Deserialize;

/// Outer body of an Events API request.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    UrlVerification {
        challenge: String,
    },
    EventCallback {
        event: InnerEvent,
        #[serde(default)]
        event_id: Option<String>,
    },
    #[serde(other)]
    Other,
}

impl Envelope {
    /// The human-written message carried by this envelope, if any.
    pub fn into_chat_message(self) -> Option<ChatMessage> {
        match self {
            Envelope::EventCallback {
                event: InnerEvent::Message(event),
                ..
            } => event.into_chat_message(),
            _ => None,
        }
    }
}

/// Event carried by an `event_callback`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InnerEvent {
    Message(MessageEvent),
    #[serde(other)]
    Other,
}

/// A `message` event as Slack sends it.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageEvent {
    pub channel: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    pub ts: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
}

/// Subtypes that are still a person posting a message.
const USER_SUBTYPES: [&str; 2] = ["thread_broadcast", "file_share"];

/// A message written by a person: `{channel, text, user, ts}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub channel: String,
    pub text: String,
    pub user: String,
    pub ts: String,
}

impl MessageEvent {
    /// Returns the message if a person wrote it.
    ///
    /// Edits, deletions, joins, bot posts and messages without text or
    /// author yield `None`.
    pub fn into_chat_message(self) -> Option<ChatMessage> {
        if self.bot_id.is_some() {
            return None;
        }
        if let Some(subtype) = self.subtype.as_deref() {
            if !USER_SUBTYPES.contains(&subtype) {
                return None;
            }
        }

        Some(ChatMessage {
            channel: self.channel,
            text: self.text?,
            user: self.user?,
            ts: self.ts,
        })
    }
}
