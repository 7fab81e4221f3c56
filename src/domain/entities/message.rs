use chrono::{DateTime, Utc};

/// Parsed content of a chat line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    /// Ordinary chat text, not addressed to the bot
    Text(String),
    /// `!name arg1 arg2 ...`
    Command { name: String, args: Vec<String> },
    Empty,
}

/// An inbound chat message in a channel
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub channel: String,
    pub nick: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(channel: impl Into<String>, nick: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            nick: nick.into(),
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A protocol event delivered by the transport
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// Registration with the server completed
    Connected,
    Message(ChatMessage),
    /// A user mode change, e.g. `+o nick`
    Mode {
        channel: String,
        op: char,
        mode: char,
        nick: String,
    },
    Disconnected,
}
