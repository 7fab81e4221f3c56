use crate::application::errors::BotError;

/// Transport trait - abstraction for the chat connection.
///
/// Implementations only enqueue lines, they never block the caller.
pub trait Transport: Send + Sync {
    /// Sends a raw protocol line
    fn send_raw(&self, line: &str) -> Result<(), BotError>;

    /// Sends a chat message to a channel
    fn privmsg(&self, channel: &str, text: &str) -> Result<(), BotError> {
        self.send_raw(&format!("PRIVMSG {} :{}", channel, text))
    }

    fn join(&self, channel: &str) -> Result<(), BotError> {
        self.send_raw(&format!("JOIN {}", channel))
    }

    fn part(&self, channel: &str) -> Result<(), BotError> {
        self.send_raw(&format!("PART {}", channel))
    }

    /// Transport info
    fn info(&self) -> TransportInfo;
}

/// Transport information
#[derive(Debug, Clone)]
pub struct TransportInfo {
    pub name: String,
    pub nick: String,
}
