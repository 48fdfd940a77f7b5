//! Inbound message model.
//!
//! An [`InboundMessage`] is what the producer hands the relay after it has
//! converted a chat update. Classification happens at conversion time: every
//! message carries exactly one [`MessageKind`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Channel a message was forwarded from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardOrigin {
    /// Display title of the origin chat.
    pub title: String,
    /// Public handle of the origin chat, without the leading `@`.
    pub handle: String,
}

/// A remote media file, referenced by the chat service's file id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaFile {
    pub file_id: String,
}

/// One resolution of a photo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    pub width: u32,
    pub height: u32,
}

/// A bot command such as `/help` or `/start@some_bot now`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Lower-cased name without the slash and without any `@bot` suffix.
    pub name: String,
    /// Everything after the first whitespace, trimmed.
    pub args: String,
}

impl Command {
    /// Parses `text` as a command. Returns `None` unless it starts with `/`
    /// followed by at least one name character.
    pub fn parse(text: &str) -> Option<Command> {
        let rest = text.strip_prefix('/')?;
        let (head, args) = match rest.split_once(char::is_whitespace) {
            Some((head, args)) => (head, args.trim()),
            None => (rest, ""),
        };
        let name = head.split('@').next().unwrap_or(head);
        if name.is_empty() {
            return None;
        }
        Some(Command {
            name: name.to_lowercase(),
            args: args.to_string(),
        })
    }
}

/// What a message carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Text(String),
    /// Every resolution the service offers; only the largest is relayed.
    Photo(Vec<PhotoSize>),
    Video(MediaFile),
    Audio(MediaFile),
    Document(MediaFile),
    Command(Command),
}

impl MessageKind {
    /// Classifies a plain text body as either a command or text.
    pub fn from_text(text: &str) -> MessageKind {
        match Command::parse(text) {
            Some(command) => MessageKind::Command(command),
            None => MessageKind::Text(text.to_string()),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MessageKind::Text(_) => "text",
            MessageKind::Photo(_) => "photo",
            MessageKind::Video(_) => "video",
            MessageKind::Audio(_) => "audio",
            MessageKind::Document(_) => "document",
            MessageKind::Command(_) => "command",
        }
    }
}

/// The highest-resolution entry of a photo set. On equal area the later entry
/// wins, which matches the ascending order the chat service sends.
pub fn largest_photo(sizes: &[PhotoSize]) -> Option<&PhotoSize> {
    sizes
        .iter()
        .max_by_key(|size| u64::from(size.width) * u64::from(size.height))
}

/// A message delivered to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub message_id: i32,
    pub chat_id: i64,
    /// Absent for anonymous channel posts.
    pub sender_id: Option<i64>,
    pub date: DateTime<Utc>,
    pub caption: Option<String>,
    pub forwarded_from: Option<ForwardOrigin>,
    pub kind: MessageKind,
}

/// Admission rules the producer applies before a message reaches the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFilter {
    /// Messages dated before this instant are dropped.
    pub started_at: DateTime<Utc>,
    pub allowed_chat_id: Option<i64>,
    pub allowed_user_id: Option<i64>,
}

impl InboundFilter {
    /// `0` for either id means no restriction, like an unset value.
    pub fn new(
        started_at: DateTime<Utc>,
        allowed_chat_id: Option<i64>,
        allowed_user_id: Option<i64>,
    ) -> Self {
        Self {
            started_at,
            allowed_chat_id: allowed_chat_id.filter(|id| *id != 0),
            allowed_user_id: allowed_user_id.filter(|id| *id != 0),
        }
    }

    pub fn admits(&self, msg: &InboundMessage) -> bool {
        if msg.date < self.started_at {
            return false;
        }
        if let Some(chat_id) = self.allowed_chat_id {
            if msg.chat_id != chat_id {
                return false;
            }
        }
        if let Some(user_id) = self.allowed_user_id {
            if msg.sender_id != Some(user_id) {
                return false;
            }
        }
        true
    }
}
