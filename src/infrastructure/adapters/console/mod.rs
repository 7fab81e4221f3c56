//! Console adapter for development/testing

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::application::errors::BotError;
use crate::domain::entities::{ChatEvent, ChatMessage};
use crate::domain::traits::{Transport, TransportInfo};

/// Transport that prints chat messages to stdout instead of a server
pub struct ConsoleTransport {
    info: TransportInfo,
}

impl ConsoleTransport {
    pub fn new(nick: impl Into<String>) -> Self {
        Self {
            info: TransportInfo {
                name: "console".to_string(),
                nick: nick.into(),
            },
        }
    }

    /// Reads stdin lines as messages from `nick` in `channel`.
    ///
    /// The stream ends with stdin.
    pub fn read_events(channel: &str, nick: &str) -> mpsc::UnboundedReceiver<ChatEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (channel, nick) = (channel.to_string(), nick.to_string());

        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        let message = ChatMessage::new(channel.as_str(), nick.as_str(), line);
                        if tx.send(ChatEvent::Message(message)).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!("stdin read error: {}", e);
                        break;
                    }
                }
            }
        });

        rx
    }
}

impl Transport for ConsoleTransport {
    fn send_raw(&self, line: &str) -> Result<(), BotError> {
        tracing::debug!(">> {}", line);
        Ok(())
    }

    fn privmsg(&self, channel: &str, text: &str) -> Result<(), BotError> {
        println!("[BOT {}] {}", channel, text);
        Ok(())
    }

    fn info(&self) -> TransportInfo {
        self.info.clone()
    }
}
