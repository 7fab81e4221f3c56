//! Built-in commands - moderation commands and `!uptime`

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::application::errors::BotError;
use crate::application::services::session::{BotSession, ChannelHandle};
use crate::domain::entities::command::normalize_name;

/// Markdown describing the default built-ins in the published command list
pub const BUILTIN_COMMANDS_INFO: &str = "\
* +!cmdadd: adds a command (Usage: !cmdadd commandname text)
* +!cmdremove: removes a command (Usage: !cmdremove commandname)
* +!cmdedit: changes the text for a command (Usage: !cmdedit commandname text)
* +!modonly: limits a command to mods only (Usage: !modonly commandname yes/no)
* +!cooldown: milliseconds before a command can be reused (Usage: !cooldown ms)
* !uptime: shows the channel's uptime if online";

/// Everything a built-in handler gets about the line that triggered it
pub struct CommandContext {
    pub session: BotSession,
    pub channel: String,
    pub args: Vec<String>,
    pub nick: String,
}

impl CommandContext {
    pub fn channel(&self) -> ChannelHandle {
        self.session.channel(&self.channel)
    }

    /// Sends a rate-limited reply to the originating channel
    pub fn reply(&self, text: &str) {
        self.session.send(&self.channel, text);
    }

    pub async fn is_mod(&self) -> Result<bool, BotError> {
        self.channel().is_mod(&self.nick).await
    }

    /// The first argument as a command name
    fn command_name(&self) -> String {
        self.args
            .first()
            .map(|arg| normalize_name(arg, self.session.case_sensitive()))
            .unwrap_or_default()
    }

    /// Every argument after the command name, joined back with spaces
    fn text(&self) -> String {
        self.args.get(1..).map(|rest| rest.join(" ")).unwrap_or_default()
    }

    /// Replies with a command table error, or `ok` and refreshes the published list
    fn reply_outcome(&self, outcome: Result<(), BotError>, ok: &str) -> Result<(), BotError> {
        match outcome {
            Ok(()) => {
                self.reply(ok);
                self.channel().spawn_refresh();
                Ok(())
            }
            Err(BotError::Command(e)) => {
                self.reply(&e.to_string());
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// A command that runs code instead of replying with a stored text.
#[async_trait]
pub trait BuiltinCommand: Send + Sync {
    async fn run(&self, ctx: CommandContext) -> Result<(), BotError>;
}

#[async_trait]
impl<F, Fut> BuiltinCommand for F
where
    F: Fn(CommandContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BotError>> + Send + 'static,
{
    async fn run(&self, ctx: CommandContext) -> Result<(), BotError> {
        (self)(ctx).await
    }
}

/// The built-ins every session starts with
pub fn default_builtins() -> HashMap<String, Arc<dyn BuiltinCommand>> {
    let mut builtins: HashMap<String, Arc<dyn BuiltinCommand>> = HashMap::new();
    builtins.insert("cmdadd".into(), Arc::new(CmdAdd));
    builtins.insert("cmdremove".into(), Arc::new(CmdRemove));
    builtins.insert("cmdedit".into(), Arc::new(CmdEdit));
    builtins.insert("modonly".into(), Arc::new(ModOnly));
    builtins.insert("cooldown".into(), Arc::new(Cooldown));
    builtins.insert("uptime".into(), Arc::new(Uptime));
    builtins
}

/// `!cmdadd name text...`
pub struct CmdAdd;

#[async_trait]
impl BuiltinCommand for CmdAdd {
    async fn run(&self, ctx: CommandContext) -> Result<(), BotError> {
        if !ctx.is_mod().await? {
            return Ok(());
        }
        if ctx.args.len() < 2 {
            ctx.reply("Usage: !cmdadd commandname text");
            return Ok(());
        }

        let name = ctx.command_name();
        let outcome = ctx.channel().add_command(&name, &ctx.text()).await;
        ctx.reply_outcome(outcome, &format!("Added command {}", name))
    }
}

/// `!cmdremove name`
pub struct CmdRemove;

#[async_trait]
impl BuiltinCommand for CmdRemove {
    async fn run(&self, ctx: CommandContext) -> Result<(), BotError> {
        if !ctx.is_mod().await? {
            return Ok(());
        }
        if ctx.args.len() != 1 {
            ctx.reply("Usage: !cmdremove commandname");
            return Ok(());
        }

        let name = ctx.command_name();
        if ctx.session.command_exists(&name).await? {
            ctx.reply(&format!("Command {} cannot be removed.", name));
            return Ok(());
        }

        let outcome = ctx.channel().remove_command(&name).await;
        ctx.reply_outcome(outcome, &format!("Removed command {}", name))
    }
}

/// `!cmdedit name text...`
pub struct CmdEdit;

#[async_trait]
impl BuiltinCommand for CmdEdit {
    async fn run(&self, ctx: CommandContext) -> Result<(), BotError> {
        if !ctx.is_mod().await? {
            return Ok(());
        }
        if ctx.args.len() < 2 {
            ctx.reply("Usage: !cmdedit commandname text");
            return Ok(());
        }

        let name = ctx.command_name();
        if ctx.session.command_exists(&name).await? {
            ctx.reply(&format!("Command {} cannot be edited.", name));
            return Ok(());
        }

        let outcome = ctx.channel().edit_command(&name, &ctx.text()).await;
        ctx.reply_outcome(outcome, &format!("Edited command {}", name))
    }
}

/// `!modonly name yes|no`
pub struct ModOnly;

#[async_trait]
impl BuiltinCommand for ModOnly {
    async fn run(&self, ctx: CommandContext) -> Result<(), BotError> {
        if !ctx.is_mod().await? {
            return Ok(());
        }
        let mod_only = match ctx.args.get(1).map(String::as_str) {
            Some("yes") if ctx.args.len() == 2 => true,
            Some("no") if ctx.args.len() == 2 => false,
            _ => {
                ctx.reply("Usage: !modonly commandname yes/no");
                return Ok(());
            }
        };

        let name = ctx.command_name();
        if ctx.session.command_exists(&name).await? {
            ctx.reply(&format!("Command {} cannot be edited.", name));
            return Ok(());
        }

        let outcome = ctx.channel().set_command_mod(&name, mod_only).await;
        ctx.reply_outcome(outcome, &format!("Command {} modonly = {}.", name, mod_only))
    }
}

/// `!cooldown milliseconds`
pub struct Cooldown;

#[async_trait]
impl BuiltinCommand for Cooldown {
    async fn run(&self, ctx: CommandContext) -> Result<(), BotError> {
        if !ctx.is_mod().await? {
            return Ok(());
        }
        let channel = ctx.channel();

        let parsed = match ctx.args.as_slice() {
            [ms] => ms.parse::<i32>().ok(),
            _ => None,
        };
        let Some(ms) = parsed else {
            let current = channel.cooldown_ms().await?;
            ctx.reply(&format!("Usage: !cooldown milliseconds. Current cooldown is {}ms.", current));
            return Ok(());
        };

        let applied = channel.set_cooldown_ms(ms as i64).await?;
        ctx.reply(&format!("Command cooldown set to {} milliseconds", applied));
        Ok(())
    }
}

/// `!uptime`
pub struct Uptime;

#[async_trait]
impl BuiltinCommand for Uptime {
    async fn run(&self, ctx: CommandContext) -> Result<(), BotError> {
        let channel = ctx.channel();
        if !channel.builtin_ready("uptime").await? {
            tracing::info!("{}> uptime is on cooldown", ctx.channel);
            return Ok(());
        }

        let Some(status) = ctx.session.status().cloned() else {
            tracing::debug!("{}> No stream status source configured", ctx.channel);
            return Ok(());
        };

        match status.live_since(channel.login()).await {
            Ok(Some(started)) => ctx.reply(&format_uptime(started, Utc::now())),
            Ok(None) => ctx.reply("Offline"),
            Err(e) => {
                tracing::warn!("{}> Stream status lookup failed: {}", ctx.channel, e);
                ctx.reply(&api_error_reply(&e));
            }
        }
        Ok(())
    }
}

/// Chat reply for a failed API call, without the error kind prefix
fn api_error_reply(error: &BotError) -> String {
    match error {
        BotError::Api(detail) | BotError::Network(detail) => format!("API error: {}", detail),
        other => format!("API error: {}", other),
    }
}

/// Formats the time since `started` as `1h2m3s`, dropping leading zero units
pub fn format_uptime(started: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - started).num_seconds().max(0);
    let (hours, minutes, seconds) = (secs / 3600, secs / 60 % 60, secs % 60);

    if hours > 0 {
        format!("{}h{}m{}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m{}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn uptime_formatting() {
        let now = Utc::now();
        assert_eq!(format_uptime(now - Duration::seconds(3723), now), "1h2m3s");
        assert_eq!(format_uptime(now - Duration::seconds(3600), now), "1h0m0s");
        assert_eq!(format_uptime(now - Duration::seconds(65), now), "1m5s");
        assert_eq!(format_uptime(now - Duration::seconds(9), now), "9s");
        assert_eq!(format_uptime(now + Duration::seconds(9), now), "0s");
    }

    #[test]
    fn api_errors_are_prefixed_once() {
        assert_eq!(api_error_reply(&BotError::Api("401 Unauthorized".into())), "API error: 401 Unauthorized");
        assert_eq!(api_error_reply(&BotError::Network("timed out".into())), "API error: timed out");
    }

    #[test]
    fn default_builtins_are_registered() {
        let builtins = default_builtins();
        for name in ["cmdadd", "cmdremove", "cmdedit", "modonly", "cooldown", "uptime"] {
            assert!(builtins.contains_key(name), "missing {}", name);
            assert!(BUILTIN_COMMANDS_INFO.contains(&format!("!{}:", name)));
        }
        assert_eq!(builtins.len(), 6);
    }
}
