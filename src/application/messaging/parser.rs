//! Message parser - Parses raw chat lines into structured content

use crate::domain::entities::Content;

/// Parses incoming chat text into commands
#[derive(Debug, Clone)]
pub struct MessageParser {
    command_prefix: String,
    case_sensitive: bool,
}

impl MessageParser {
    pub fn new(prefix: impl Into<String>, case_sensitive: bool) -> Self {
        Self {
            command_prefix: prefix.into(),
            case_sensitive,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.command_prefix
    }

    /// Parse a chat line
    pub fn parse(&self, text: &str) -> Content {
        if text.is_empty() {
            return Content::Empty;
        }

        // Only handle commands
        if text.chars().count() <= 1 || !text.starts_with(&self.command_prefix) {
            return Content::Text(text.to_string());
        }

        self.parse_command(&text[self.command_prefix.len()..])
    }

    /// Parse a command message with the prefix already removed
    fn parse_command(&self, cmd_text: &str) -> Content {
        let mut parts = cmd_text.split_whitespace();
        let Some(name) = parts.next() else {
            return Content::Empty;
        };

        let name = if self.case_sensitive {
            name.to_string()
        } else {
            name.to_lowercase()
        };
        let args = parts.map(|s| s.to_string()).collect();

        Content::Command { name, args }
    }
}
