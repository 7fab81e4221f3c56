//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::application::errors::ConfigError;
use crate::domain::entities::RateLimiter;
use crate::infrastructure::adapters::ReconnectPolicy;

/// Bot configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    pub bot: BotConfig,
    pub twitch: TwitchConfig,
    #[serde(default)]
    pub gist: GistConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BotConfig {
    /// Shown as the title of the published command lists
    pub name: String,
    pub prefix: String,
    #[serde(default)]
    pub case_sensitive: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TwitchConfig {
    pub server: String,
    pub port: u16,
    pub user: String,
    /// `oauth:...` chat token
    pub oauth: String,
    #[serde(default)]
    pub channels: Vec<String>,
    /// The account moderates its channels and gets the higher message budget
    #[serde(default)]
    pub is_mod: bool,
    /// Nicks whose text commands are ignored, e.g. other bots
    #[serde(default)]
    pub ignore: Vec<String>,
    /// First delay before reconnecting, doubled on every failed attempt
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_reconnect_max_ms() -> u64 {
    60_000
}

impl TwitchConfig {
    pub fn reconnect(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            min_delay: Duration::from_millis(self.reconnect_delay_ms),
            max_delay: Duration::from_millis(self.reconnect_max_ms.max(self.reconnect_delay_ms)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct GistConfig {
    /// No command lists are published without a token
    pub token: Option<String>,
    pub api_url: Option<String>,
    #[serde(default)]
    pub public: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct StatusConfig {
    pub api_url: Option<String>,
    /// `!uptime` is disabled without a client id
    pub client_id: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("chanbot.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RateLimitConfig {
    pub period_seconds: u64,
    pub user_limit: u32,
    pub mod_limit: u32,
    pub retry_margin_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            period_seconds: 30,
            user_limit: 19,
            mod_limit: 99,
            retry_margin_ms: 500,
        }
    }
}

impl RateLimitConfig {
    /// Builds the limiter for an account
    pub fn limiter(&self, is_mod: bool) -> RateLimiter {
        let limit = if is_mod { self.mod_limit } else { self.user_limit };
        RateLimiter::new(limit)
            .with_period(Duration::from_secs(self.period_seconds))
            .with_retry_margin(Duration::from_millis(self.retry_margin_ms))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bot: BotConfig {
                name: crate::application::services::session::BOT_NAME.to_string(),
                prefix: "!".to_string(),
                case_sensitive: false,
            },
            twitch: TwitchConfig {
                server: "irc.chat.twitch.tv".to_string(),
                port: 6667,
                user: String::new(),
                oauth: String::new(),
                channels: Vec::new(),
                is_mod: false,
                ignore: Vec::new(),
                reconnect_delay_ms: default_reconnect_delay_ms(),
                reconnect_max_ms: default_reconnect_max_ms(),
            },
            gist: GistConfig::default(),
            status: StatusConfig::default(),
            database: DatabaseConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Parse(format!("Failed to read config: {}", e)))?;

        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(format!("Failed to parse config: {}", e)))
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(|e| ConfigError::Parse(format!("Failed to serialize config: {}", e)))
    }

    pub fn load_env() -> Self {
        // Load from environment variables
        let mut config = Config::default();

        if let Ok(user) = std::env::var("TWITCH_USER") {
            config.twitch.user = user;
        }

        if let Ok(oauth) = std::env::var("TWITCH_OAUTH") {
            config.twitch.oauth = oauth;
        }

        if let Ok(token) = std::env::var("GIST_TOKEN") {
            config.gist.token = Some(token);
        }

        if let Ok(client_id) = std::env::var("TWITCH_CLIENT_ID") {
            config.status.client_id = Some(client_id);
        }

        if let Ok(prefix) = std::env::var("BOT_PREFIX") {
            config.bot.prefix = prefix;
        }

        if let Ok(channels) = std::env::var("BOT_CHANNELS") {
            config.twitch.channels = parse_channels(&channels);
        }

        config
    }

    /// Checks the fields needed to connect
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.twitch.user.is_empty() {
            return Err(ConfigError::MissingField("twitch.user".into()));
        }
        if self.twitch.oauth.is_empty() {
            return Err(ConfigError::MissingField("twitch.oauth".into()));
        }
        if self.bot.prefix.is_empty() {
            return Err(ConfigError::InvalidValue("bot.prefix must not be empty".into()));
        }
        if let Some(channel) = self.twitch.channels.iter().find(|c| !c.starts_with('#')) {
            return Err(ConfigError::InvalidValue(format!("channel {} must start with #", channel)));
        }
        if self.rate_limit.period_seconds == 0 {
            return Err(ConfigError::InvalidValue("rate-limit.period-seconds must be positive".into()));
        }
        if self.rate_limit.user_limit == 0 {
            return Err(ConfigError::InvalidValue("rate-limit.user-limit must be positive".into()));
        }
        if self.rate_limit.mod_limit == 0 {
            return Err(ConfigError::InvalidValue("rate-limit.mod-limit must be positive".into()));
        }
        if self.twitch.reconnect_delay_ms == 0 {
            return Err(ConfigError::InvalidValue("twitch.reconnect-delay-ms must be positive".into()));
        }
        Ok(())
    }
}

/// Splits a comma separated channel list, adding the `#` where missing
fn parse_channels(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(|c| if c.starts_with('#') { c.to_string() } else { format!("#{}", c) })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_round_trips_through_yaml() {
        let config = Config::default();
        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("rate-limit:"));
        assert!(yaml.contains("case-sensitive: false"));
        assert_eq!(Config::from_yaml(&yaml).unwrap(), config);
    }

    #[test]
    fn optional_sections_default() {
        let yaml = "
bot:
  name: mybot
  prefix: '?'
twitch:
  server: irc.chat.twitch.tv
  port: 6667
  user: mybot
  oauth: oauth:abc
  channels: ['#one']
  is-mod: true
";
        let config = Config::from_yaml(yaml).unwrap();
        assert!(config.twitch.is_mod);
        assert!(config.gist.token.is_none());
        assert_eq!(config.rate_limit, RateLimitConfig::default());
        assert_eq!(config.database.path, PathBuf::from("chanbot.db"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_reports_missing_credentials() {
        let config = Config::default();
        assert!(matches!(config.validate(), Err(ConfigError::MissingField(f)) if f == "twitch.user"));

        let mut config = Config::default();
        config.twitch.user = "bot".into();
        config.twitch.oauth = "oauth:x".into();
        config.twitch.channels = vec!["nohash".into()];
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn validate_rejects_zero_message_limits() {
        let mut config = Config::default();
        config.twitch.user = "bot".into();
        config.twitch.oauth = "oauth:x".into();
        assert!(config.validate().is_ok());

        config.rate_limit.user_limit = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(f)) if f.contains("user-limit")));

        config.rate_limit.user_limit = 19;
        config.rate_limit.mod_limit = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(f)) if f.contains("mod-limit")));
    }

    #[test]
    fn reconnect_delays_default_and_clamp() {
        let config = Config::default();
        assert_eq!(config.twitch.reconnect(), ReconnectPolicy::default());

        let mut twitch = config.twitch.clone();
        twitch.reconnect_delay_ms = 5000;
        twitch.reconnect_max_ms = 100;
        let policy = twitch.reconnect();
        assert_eq!(policy.min_delay, Duration::from_secs(5));
        assert_eq!(policy.max_delay, Duration::from_secs(5));
    }

    #[test]
    fn channel_lists_get_hashes() {
        assert_eq!(parse_channels("a, #b,,c "), vec!["#a", "#b", "#c"]);
    }

    #[test]
    fn limiter_uses_account_limit() {
        let config = RateLimitConfig::default();
        assert_eq!(config.limiter(false).message_limit(), 19);
        assert_eq!(config.limiter(true).message_limit(), 99);
    }
}
