use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Speaker name used for messages the application itself produces.
pub const SYSTEM_SPEAKER: &str = "Sistema";

/// Raw chat event as delivered by a transport, before any interpretation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawChatEvent {
    pub channel: String,
    /// Login name from the message prefix, if the transport provided one.
    pub username: Option<String>,
    /// IRCv3 message tags (already unescaped).
    #[serde(default)]
    pub tags: HashMap<String, String>,
    pub text: String,
    /// True when the event echoes a message sent over our own connection.
    #[serde(default)]
    pub is_self: bool,
    pub timestamp: DateTime<Utc>,
}

impl RawChatEvent {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

/// Sender identity and roles, as seen by the permission filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderAttributes {
    /// Lowercased login; the identity key for ignore lists.
    pub username: String,
    pub display_name: String,
    pub is_mod: bool,
    pub is_vip: bool,
    pub is_broadcaster: bool,
    pub is_subscriber: bool,
}

impl SenderAttributes {
    /// A sender with no roles. The username is lowercased and doubles as display name.
    pub fn plain(username: &str) -> Self {
        Self {
            username: username.to_lowercase(),
            display_name: username.to_string(),
            ..Self::default()
        }
    }

    /// True when the sender holds any role that passes subscribers-only mode.
    pub fn has_supporter_role(&self) -> bool {
        self.is_subscriber || self.is_vip || self.is_mod || self.is_broadcaster
    }
}

/// A chat message ready for the permission filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender: SenderAttributes,
    /// Raw text, untrimmed.
    pub text: String,
    pub is_self: bool,
}

impl ChatMessage {
    pub fn new(sender: SenderAttributes, text: impl Into<String>) -> Self {
        Self {
            sender,
            text: text.into(),
            is_self: false,
        }
    }
}

/// One pending utterance in the speech queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeechItem {
    /// Rendered phrase handed to the speech engine.
    pub text: String,
    pub speaker: String,
    pub message: String,
}

impl SpeechItem {
    pub fn new(speaker: impl Into<String>, message: impl Into<String>) -> Self {
        let speaker = speaker.into();
        let message = message.into();
        Self {
            text: format!("{speaker} dice: {message}"),
            speaker,
            message,
        }
    }

    /// Build the utterance for an admitted message (display name + trimmed text).
    pub fn from_message(message: &ChatMessage) -> Self {
        Self::new(message.sender.display_name.clone(), message.text.trim())
    }

    /// The "sound check" utterance queued by the operator's test command.
    pub fn sound_check() -> Self {
        Self::new(SYSTEM_SPEAKER, "Prueba de sonido exitosa")
    }
}

/// Chat connection lifecycle, as reported to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting { channel: String },
    Connected { channel: String },
    Disconnected { reason: Option<String> },
    Error { message: String },
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting { .. } => write!(f, "Connecting..."),
            Self::Connected { channel } => write!(f, "Connected to #{channel}"),
            Self::Disconnected { reason: Some(reason) } => write!(f, "Disconnected: {reason}"),
            Self::Disconnected { reason: None } => write!(f, "Disconnected"),
            Self::Error { message } => write!(f, "Error: {message}"),
        }
    }
}

/// One line of the operator-visible message log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub sender: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(SYSTEM_SPEAKER, text)
    }
}
