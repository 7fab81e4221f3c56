use std::time::Instant;

/// A per-channel text command: `!name` replies with `text`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextCommand {
    /// The reply the command triggers
    pub text: String,
    /// Reserved for channel moderators
    pub mod_only: bool,
    /// When the command last produced a reply. `None` if never used.
    pub last_usage: Option<Instant>,
}

impl TextCommand {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            mod_only: false,
            last_usage: None,
        }
    }

    pub fn with_mod_only(mut self, mod_only: bool) -> Self {
        self.mod_only = mod_only;
        self
    }
}

/// Outcome of invoking a text command in a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// No text command with that name
    Unknown,
    /// Rejected, still on cooldown
    OnCooldown,
    /// Rejected, the sender is not a moderator
    ModOnly,
    /// Accepted, reply with this text
    Reply(String),
}

impl Invocation {
    /// Whether the command existed. Rejections count as handled.
    pub fn handled(&self) -> bool {
        !matches!(self, Invocation::Unknown)
    }
}

/// Strips a leading `!` from a command name given as an argument.
pub fn strip_prefix(name: &str) -> &str {
    name.strip_prefix('!').unwrap_or(name)
}

/// Normalizes a command name according to the case sensitivity setting.
pub fn normalize_name(name: &str, case_sensitive: bool) -> String {
    let name = strip_prefix(name);
    if case_sensitive {
        name.to_string()
    } else {
        name.to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_bang_and_folds() {
        assert_eq!(normalize_name("!Hello", false), "hello");
        assert_eq!(normalize_name("!Hello", true), "Hello");
        assert_eq!(normalize_name("plain", false), "plain");
    }

    #[test]
    fn rejections_are_handled() {
        assert!(!Invocation::Unknown.handled());
        assert!(Invocation::OnCooldown.handled());
        assert!(Invocation::ModOnly.handled());
        assert!(Invocation::Reply("y".into()).handled());
    }
}
