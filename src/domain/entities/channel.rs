//! Per-channel state: text commands, moderators and cooldowns.
//!
//! A `ChannelState` is owned by the bot session's channel registry, which
//! lives inside the serial executor. Nothing here synchronizes on its own.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use super::command::{Invocation, TextCommand};
use crate::application::errors::{CommandError, StorageError};
use crate::domain::traits::CommandStore;

/// Attempts made for each mutating store call before giving up
pub const STORE_ATTEMPTS: usize = 5;

/// A chat channel the bot is joined to
#[derive(Debug, Clone)]
pub struct ChannelState {
    name: String,
    commands: HashMap<String, TextCommand>,
    moderators: HashSet<String>,
    cooldown_ms: i32,
    builtin_last_usage: HashMap<String, Instant>,
}

impl ChannelState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            commands: HashMap::new(),
            moderators: HashSet::new(),
            cooldown_ms: 0,
            builtin_last_usage: HashMap::new(),
        }
    }

    /// Creates the state with the commands persisted for this channel
    pub fn load(name: impl Into<String>, store: &dyn CommandStore) -> Result<Self, StorageError> {
        let mut channel = Self::new(name);
        channel.commands = store.get_commands(&channel.name)?;
        tracing::info!("{}> Loaded {} commands", channel.name, channel.commands.len());
        Ok(channel)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Login name of the channel owner (the channel name without `#`)
    pub fn login(&self) -> &str {
        self.name.trim_start_matches('#')
    }

    pub fn command(&self, name: &str) -> Option<&TextCommand> {
        self.commands.get(name)
    }

    pub fn command_exists(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    /// Adds a text command. The command is persisted before it becomes visible.
    pub fn add_command(&mut self, store: &dyn CommandStore, name: &str, text: &str) -> Result<(), CommandError> {
        if self.commands.contains_key(name) {
            return Err(CommandError::AlreadyExists(name.to_string()));
        }

        attempt_query(|| store.set_command(&self.name, name, text, false))?;

        self.commands.insert(name.to_string(), TextCommand::new(text));
        tracing::info!("{}> Added command {} -> {}", self.name, name, text);
        Ok(())
    }

    pub fn remove_command(&mut self, store: &dyn CommandStore, name: &str) -> Result<(), CommandError> {
        if !self.commands.contains_key(name) {
            return Err(CommandError::NotFound(name.to_string()));
        }

        attempt_query(|| store.remove_command(&self.name, name))?;

        self.commands.remove(name);
        tracing::info!("{}> Removed command {}", self.name, name);
        Ok(())
    }

    /// Replaces the text of a command, keeping its mod-only flag
    pub fn edit_command(&mut self, store: &dyn CommandStore, name: &str, text: &str) -> Result<(), CommandError> {
        let Some(mod_only) = self.commands.get(name).map(|c| c.mod_only) else {
            return Err(CommandError::NotFound(name.to_string()));
        };

        attempt_query(|| store.set_command(&self.name, name, text, mod_only))?;

        if let Some(command) = self.commands.get_mut(name) {
            command.text = text.to_string();
        }
        tracing::info!("{}> Edited command {} -> {}", self.name, name, text);
        Ok(())
    }

    pub fn set_command_mod(&mut self, store: &dyn CommandStore, name: &str, mod_only: bool) -> Result<(), CommandError> {
        let Some(text) = self.commands.get(name).map(|c| c.text.clone()) else {
            return Err(CommandError::NotFound(name.to_string()));
        };

        attempt_query(|| store.set_command(&self.name, name, &text, mod_only))?;

        if let Some(command) = self.commands.get_mut(name) {
            command.mod_only = mod_only;
        }
        tracing::info!("{}> Command {} mod_only = {}", self.name, name, mod_only);
        Ok(())
    }

    /// Runs a text command for `nick`.
    ///
    /// Cooldown is checked before the mod-only flag. Rejections leave the
    /// command untouched and are only logged.
    pub fn invoke(&mut self, name: &str, nick: &str, now: Instant) -> Invocation {
        let cooldown = self.cooldown();
        let is_mod = self.moderators.contains(nick);
        let channel = &self.name;

        let Some(command) = self.commands.get_mut(name) else {
            return Invocation::Unknown;
        };

        if let Some(last) = command.last_usage {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < cooldown {
                tracing::info!(
                    "{}> Rejected command {} because it is still on cooldown, {:?} since last usage, cooldown is {:?}",
                    channel, name, elapsed, cooldown
                );
                return Invocation::OnCooldown;
            }
        }

        if command.mod_only && !is_mod {
            tracing::info!("{}> Rejected command {} because {} is not a mod", channel, name, nick);
            return Invocation::ModOnly;
        }

        command.last_usage = Some(now);
        tracing::info!("{}> Processing text command {}", channel, name);
        Invocation::Reply(command.text.clone())
    }

    /// Allows `nick` to use mod commands
    pub fn add_mod(&mut self, nick: &str) {
        tracing::info!("{}> Adding mod {}", self.name, nick);
        self.moderators.insert(nick.to_string());
    }

    pub fn remove_mod(&mut self, nick: &str) {
        tracing::info!("{}> Removing mod {}", self.name, nick);
        self.moderators.remove(nick);
    }

    pub fn is_mod(&self, nick: &str) -> bool {
        self.moderators.contains(nick)
    }

    pub fn cooldown_ms(&self) -> i32 {
        self.cooldown_ms
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms.max(0) as u64)
    }

    /// Sets the command cooldown, clamping negative values to zero.
    /// Returns the value that was applied.
    pub fn set_cooldown_ms(&mut self, ms: i64) -> i32 {
        let ms = ms.clamp(0, i32::MAX as i64) as i32;
        self.cooldown_ms = ms;
        tracing::info!("{}> Command cooldown set to {}ms", self.name, ms);
        ms
    }

    /// Checks the cooldown of a built-in command and stamps its usage when
    /// it is allowed to run.
    pub fn builtin_ready(&mut self, builtin: &str, now: Instant) -> bool {
        let cooldown = self.cooldown();
        if let Some(last) = self.builtin_last_usage.get(builtin) {
            if now.saturating_duration_since(*last) < cooldown {
                return false;
            }
        }
        self.builtin_last_usage.insert(builtin.to_string(), now);
        true
    }

    /// Renders the alphabetically sorted command list.
    ///
    /// Each entry is `!name`, or `!name: text` with `include_text`. Mod-only
    /// entries get `mod_prefix`. Entries are joined with `separator`.
    pub fn command_list(&self, separator: &str, mod_prefix: &str, include_text: bool) -> String {
        let mut names: Vec<&String> = self.commands.keys().collect();
        names.sort();

        names
            .into_iter()
            .map(|name| {
                let command = &self.commands[name];
                let prefix = if command.mod_only { mod_prefix } else { "" };
                if include_text {
                    format!("{}!{}: {}", prefix, name, command.text)
                } else {
                    format!("{}!{}", prefix, name)
                }
            })
            .collect::<Vec<_>>()
            .join(separator)
    }
}

/// Runs a store call up to `STORE_ATTEMPTS` times.
pub fn attempt_query<F>(mut query: F) -> Result<(), CommandError>
where
    F: FnMut() -> Result<(), StorageError>,
{
    for attempt in 1..=STORE_ATTEMPTS {
        match query() {
            Ok(()) => return Ok(()),
            Err(e) => tracing::warn!("Store query failed (attempt {}/{}): {}", attempt, STORE_ATTEMPTS, e),
        }
    }
    Err(CommandError::Store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    #[derive(Default)]
    struct FakeStore {
        rows: RefCell<HashMap<(String, String), (String, bool)>>,
        failures_left: Cell<usize>,
    }

    impl FakeStore {
        fn failing(times: usize) -> Self {
            let store = Self::default();
            store.failures_left.set(times);
            store
        }

        fn maybe_fail(&self) -> Result<(), StorageError> {
            if self.failures_left.get() > 0 {
                self.failures_left.set(self.failures_left.get() - 1);
                return Err(StorageError::Io(std::io::Error::other("database is locked")));
            }
            Ok(())
        }
    }

    impl CommandStore for FakeStore {
        fn get_commands(&self, channel: &str) -> Result<HashMap<String, TextCommand>, StorageError> {
            Ok(self
                .rows
                .borrow()
                .iter()
                .filter(|((c, _), _)| c == channel)
                .map(|((_, n), (t, m))| (n.clone(), TextCommand::new(t.clone()).with_mod_only(*m)))
                .collect())
        }

        fn set_command(&self, channel: &str, name: &str, text: &str, mod_only: bool) -> Result<(), StorageError> {
            self.maybe_fail()?;
            self.rows
                .borrow_mut()
                .insert((channel.into(), name.into()), (text.into(), mod_only));
            Ok(())
        }

        fn remove_command(&self, channel: &str, name: &str) -> Result<(), StorageError> {
            self.maybe_fail()?;
            self.rows.borrow_mut().remove(&(channel.to_string(), name.to_string()));
            Ok(())
        }

        fn get_gist_url(&self, _channel: &str) -> Result<String, StorageError> {
            Ok(String::new())
        }

        fn set_gist_url(&self, _channel: &str, _url: &str) -> Result<(), StorageError> {
            Ok(())
        }
    }

    #[test]
    fn add_existing_command_fails_and_keeps_text() {
        let store = FakeStore::default();
        let mut channel = ChannelState::new("#test");

        channel.add_command(&store, "foo", "bar").unwrap();
        let err = channel.add_command(&store, "foo", "baz").unwrap_err();

        assert_eq!(err, CommandError::AlreadyExists("foo".into()));
        assert_eq!(channel.command("foo").unwrap().text, "bar");
        assert_eq!(store.rows.borrow()[&("#test".into(), "foo".into())].0, "bar");
    }

    #[test]
    fn missing_commands_are_not_found() {
        let store = FakeStore::default();
        let mut channel = ChannelState::new("#test");

        assert_eq!(
            channel.remove_command(&store, "missing"),
            Err(CommandError::NotFound("missing".into()))
        );
        assert_eq!(
            channel.edit_command(&store, "missing", "x"),
            Err(CommandError::NotFound("missing".into()))
        );
        assert_eq!(
            channel.set_command_mod(&store, "missing", true),
            Err(CommandError::NotFound("missing".into()))
        );
    }

    #[test]
    fn edit_keeps_mod_only_flag() {
        let store = FakeStore::default();
        let mut channel = ChannelState::new("#test");
        channel.add_command(&store, "x", "old").unwrap();
        channel.set_command_mod(&store, "x", true).unwrap();

        channel.edit_command(&store, "x", "new").unwrap();

        let command = channel.command("x").unwrap();
        assert_eq!(command.text, "new");
        assert!(command.mod_only);
        assert_eq!(store.rows.borrow()[&("#test".into(), "x".into())], ("new".into(), true));
    }

    #[test]
    fn transient_store_failures_are_retried() {
        let store = FakeStore::failing(STORE_ATTEMPTS - 1);
        let mut channel = ChannelState::new("#test");

        assert!(channel.add_command(&store, "x", "y").is_ok());
        assert!(channel.command_exists("x"));
    }

    #[test]
    fn persistent_store_failure_leaves_table_untouched() {
        let store = FakeStore::failing(STORE_ATTEMPTS);
        let mut channel = ChannelState::new("#test");

        assert_eq!(channel.add_command(&store, "x", "y"), Err(CommandError::Store));
        assert!(!channel.command_exists("x"));
        assert_eq!(CommandError::Store.to_string(), "Database error. Please try again.");
    }

    #[test]
    fn invoke_respects_cooldown() {
        let store = FakeStore::default();
        let mut channel = ChannelState::new("#test");
        channel.add_command(&store, "x", "y").unwrap();
        channel.set_cooldown_ms(1000);

        let start = Instant::now();
        assert_eq!(channel.invoke("x", "anyone", start), Invocation::Reply("y".into()));
        assert_eq!(
            channel.invoke("x", "anyone", start + Duration::from_millis(500)),
            Invocation::OnCooldown
        );
        assert_eq!(
            channel.invoke("x", "anyone", start + Duration::from_millis(1000)),
            Invocation::Reply("y".into())
        );
    }

    #[test]
    fn rejected_invocation_does_not_stamp_usage() {
        let store = FakeStore::default();
        let mut channel = ChannelState::new("#test");
        channel.add_command(&store, "x", "y").unwrap();
        channel.set_command_mod(&store, "x", true).unwrap();
        channel.set_cooldown_ms(1000);

        let now = Instant::now();
        assert_eq!(channel.invoke("x", "viewer", now), Invocation::ModOnly);
        assert!(channel.command("x").unwrap().last_usage.is_none());

        channel.add_mod("moderator");
        assert_eq!(channel.invoke("x", "moderator", now), Invocation::Reply("y".into()));
    }

    #[test]
    fn invoke_unknown_is_not_handled() {
        let mut channel = ChannelState::new("#test");
        assert!(!channel.invoke("nope", "nick", Instant::now()).handled());
    }

    #[test]
    fn command_list_is_sorted_and_prefixed() {
        let store = FakeStore::default();
        let mut channel = ChannelState::new("#test");
        channel.add_command(&store, "b", "second").unwrap();
        channel.add_command(&store, "a", "first").unwrap();
        channel.set_command_mod(&store, "a", true).unwrap();

        assert_eq!(channel.command_list(", ", "+", false), "+!a, !b");
        assert_eq!(channel.command_list("\n", "+", true), "+!a: first\n!b: second");
        assert_eq!(ChannelState::new("#empty").command_list(", ", "+", false), "");
    }

    #[test]
    fn cooldown_clamps_negative_values() {
        let mut channel = ChannelState::new("#test");
        assert_eq!(channel.set_cooldown_ms(-50), 0);
        assert_eq!(channel.set_cooldown_ms(250), 250);
        assert_eq!(channel.cooldown(), Duration::from_millis(250));
    }

    #[test]
    fn builtin_cooldown_is_tracked_separately() {
        let store = FakeStore::default();
        let mut channel = ChannelState::new("#test");
        channel.add_command(&store, "x", "y").unwrap();
        channel.set_cooldown_ms(1000);

        let now = Instant::now();
        assert!(channel.builtin_ready("uptime", now));
        assert!(!channel.builtin_ready("uptime", now + Duration::from_millis(10)));
        assert_eq!(channel.invoke("x", "nick", now), Invocation::Reply("y".into()));
        assert!(channel.builtin_ready("uptime", now + Duration::from_millis(1000)));
    }

    #[test]
    fn load_reads_persisted_commands() {
        let store = FakeStore::default();
        store.set_command("#test", "hi", "hello", true).unwrap();
        store.set_command("#other", "bye", "ciao", false).unwrap();

        let channel = ChannelState::load("#test", &store).unwrap();

        assert!(channel.command("hi").unwrap().mod_only);
        assert!(!channel.command_exists("bye"));
        assert_eq!(channel.login(), "test");
    }
}
