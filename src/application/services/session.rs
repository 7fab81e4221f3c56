//! Bot session - owns the serial executor and everything it guards.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::application::errors::{BotError, ExecutorError, StorageError};
use crate::application::executor::SerialExecutor;
use crate::application::messaging::dispatcher::{CommandRouter, Dispatch};
use crate::application::messaging::middleware::Middleware;
use crate::application::messaging::parser::MessageParser;
use crate::application::services::command_list;
use crate::application::services::command_service::{self, BuiltinCommand, BUILTIN_COMMANDS_INFO};
use crate::application::services::outbox::Outbox;
use crate::domain::entities::channel::attempt_query;
use crate::domain::entities::{ChannelState, ChatEvent, ChatMessage, Invocation, RateLimiter};
use crate::domain::traits::{CommandStore, GistPublisher, StreamStatus, Transport};

/// Default bot name shown in the published command lists
pub const BOT_NAME: &str = concat!("chanbot ", env!("CARGO_PKG_VERSION"));

/// Everything mutable in a session. Only the executor's worker touches it.
pub struct BotState {
    pub(crate) channels: HashMap<String, ChannelState>,
    pub(crate) builtins: HashMap<String, Arc<dyn BuiltinCommand>>,
    pub(crate) ignore: HashSet<String>,
    pub(crate) limiter: RateLimiter,
    pub(crate) store: Box<dyn CommandStore>,
    pub(crate) builtin_info: String,
}

impl BotState {
    pub fn new(store: Box<dyn CommandStore>, limiter: RateLimiter) -> Self {
        Self {
            channels: HashMap::new(),
            builtins: HashMap::new(),
            ignore: HashSet::new(),
            limiter,
            store,
            builtin_info: BUILTIN_COMMANDS_INFO.to_string(),
        }
    }
}

/// Static settings of a session
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub bot_name: String,
    pub nick: String,
    pub prefix: String,
    pub is_mod: bool,
    pub case_sensitive: bool,
}

struct SessionInner {
    executor: SerialExecutor<BotState>,
    outbox: Outbox,
    transport: Arc<dyn Transport>,
    publisher: Option<Arc<dyn GistPublisher>>,
    status: Option<Arc<dyn StreamStatus>>,
    router: CommandRouter,
    settings: SessionSettings,
}

/// A bot connected to one account, in any number of channels.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct BotSession {
    inner: Arc<SessionInner>,
}

/// Builds a [`BotSession`]
pub struct BotSessionBuilder {
    transport: Arc<dyn Transport>,
    store: Box<dyn CommandStore>,
    publisher: Option<Arc<dyn GistPublisher>>,
    status: Option<Arc<dyn StreamStatus>>,
    middleware: Vec<Arc<dyn Middleware>>,
    limiter: Option<RateLimiter>,
    settings: SessionSettings,
}

impl BotSessionBuilder {
    pub fn new(transport: Arc<dyn Transport>, store: Box<dyn CommandStore>) -> Self {
        let nick = transport.info().nick;
        Self {
            transport,
            store,
            publisher: None,
            status: None,
            middleware: Vec::new(),
            limiter: None,
            settings: SessionSettings {
                bot_name: BOT_NAME.to_string(),
                nick,
                prefix: "!".to_string(),
                is_mod: false,
                case_sensitive: false,
            },
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn GistPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_status(mut self, status: Arc<dyn StreamStatus>) -> Self {
        self.status = Some(status);
        self
    }

    /// Adds a pre/post hook for inbound messages
    pub fn with_middleware<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Overrides the limiter derived from the account type
    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn bot_name(mut self, name: impl Into<String>) -> Self {
        self.settings.bot_name = name.into();
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.settings.prefix = prefix.into();
        self
    }

    /// Whether the bot account moderates the channels it joins
    pub fn is_mod(mut self, is_mod: bool) -> Self {
        self.settings.is_mod = is_mod;
        self
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.settings.case_sensitive = case_sensitive;
        self
    }

    /// Starts the executor. Must be called from within a tokio runtime.
    pub fn build(self) -> Result<BotSession, BotError> {
        let runtime = Handle::try_current().map_err(|_| ExecutorError::NoRuntime)?;
        let limiter = self
            .limiter
            .unwrap_or_else(|| RateLimiter::for_account(self.settings.is_mod));
        tracing::info!("Initialized rate limiter with msglimit={}", limiter.message_limit());

        let mut state = BotState::new(self.store, limiter);
        state.builtins = command_service::default_builtins();
        state.ignore.insert(self.settings.nick.clone());
        tracing::info!("Built-in commands initialized");

        let executor = SerialExecutor::start("bot", state)?;
        let outbox = Outbox::new(executor.clone(), self.transport.clone(), runtime, self.settings.is_mod);
        let router = CommandRouter::new(
            MessageParser::new(&self.settings.prefix, self.settings.case_sensitive),
            self.middleware,
        );

        Ok(BotSession {
            inner: Arc::new(SessionInner {
                executor,
                outbox,
                transport: self.transport,
                publisher: self.publisher,
                status: self.status,
                router,
                settings: self.settings,
            }),
        })
    }
}

impl BotSession {
    pub fn builder(transport: Arc<dyn Transport>, store: Box<dyn CommandStore>) -> BotSessionBuilder {
        BotSessionBuilder::new(transport, store)
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.inner.settings
    }

    pub fn case_sensitive(&self) -> bool {
        self.inner.settings.case_sensitive
    }

    pub(crate) fn executor(&self) -> &SerialExecutor<BotState> {
        &self.inner.executor
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    pub fn publisher(&self) -> Option<&Arc<dyn GistPublisher>> {
        self.inner.publisher.as_ref()
    }

    pub fn status(&self) -> Option<&Arc<dyn StreamStatus>> {
        self.inner.status.as_ref()
    }

    /// Handle to a channel. The channel doesn't have to be joined yet.
    pub fn channel(&self, name: &str) -> ChannelHandle {
        ChannelHandle {
            session: self.clone(),
            name: name.to_string(),
        }
    }

    /// Names of the joined channels, sorted
    pub async fn channels(&self) -> Result<Vec<String>, BotError> {
        let mut names = self
            .executor()
            .submit(|state| state.channels.keys().cloned().collect::<Vec<_>>())
            .await?;
        names.sort();
        Ok(names)
    }

    /// Sends a rate-limited message
    pub fn send(&self, channel: &str, text: &str) {
        self.inner.outbox.send(channel, text);
    }

    /// Joins a channel and loads its saved commands.
    ///
    /// Publishing the command list is best effort; a failure is logged and
    /// the channel is still joined.
    pub async fn join(&self, channel: &str) -> Result<(), BotError> {
        tracing::info!("Joining {}", channel);
        let name = channel.to_string();
        let gist_url = self
            .executor()
            .submit(move |state| -> Result<Option<String>, StorageError> {
                if state.channels.contains_key(&name) {
                    return Ok(None);
                }
                let loaded = ChannelState::load(&name, state.store.as_ref())?;
                let url = state.store.get_gist_url(&name)?;
                state.channels.insert(name, loaded);
                Ok(Some(url))
            })
            .await??;

        let Some(gist_url) = gist_url else {
            tracing::info!("Already joined {}", channel);
            return Ok(());
        };

        self.inner.transport.join(channel)?;
        let handle = self.channel(channel);

        if !gist_url.is_empty() {
            handle.ensure_help(&gist_url).await?;
        }

        if let Err(e) = handle.refresh_command_list().await {
            tracing::warn!("{}> Failed to update command list, will retry next time: {}", channel, e);
        }

        // First publish: the list URL is only known now
        if gist_url.is_empty() {
            let url = handle.gist_url().await?;
            if !url.is_empty() {
                handle.ensure_help(&url).await?;
                if let Err(e) = handle.refresh_command_list().await {
                    tracing::warn!("{}> Failed to update command list, will retry next time: {}", channel, e);
                }
            }
        }

        Ok(())
    }

    /// Leaves a channel. Its commands stay in the store.
    pub async fn part(&self, channel: &str) -> Result<(), BotError> {
        tracing::info!("Leaving {}", channel);
        let name = channel.to_string();
        let removed = self
            .executor()
            .submit(move |state| state.channels.remove(&name).is_some())
            .await?;
        if !removed {
            return Err(BotError::ChannelNotJoined(channel.to_string()));
        }
        self.inner.transport.part(channel)
    }

    /// Adds a built-in command, replacing any with the same name
    pub async fn add_command(&self, name: &str, handler: Arc<dyn BuiltinCommand>) -> Result<(), BotError> {
        let name = name.to_string();
        self.executor()
            .submit(move |state| {
                state.builtins.insert(name, handler);
            })
            .await?;
        Ok(())
    }

    pub async fn remove_command(&self, name: &str) -> Result<(), BotError> {
        let name = name.to_string();
        self.executor()
            .submit(move |state| {
                state.builtins.remove(&name);
            })
            .await?;
        Ok(())
    }

    /// Whether `name` is a built-in command
    pub async fn command_exists(&self, name: &str) -> Result<bool, BotError> {
        let name = name.to_string();
        Ok(self
            .executor()
            .submit(move |state| state.builtins.contains_key(&name))
            .await?)
    }

    /// Ignores text commands from these nicks. The bot always ignores itself.
    pub async fn ignore<I, T>(&self, nicks: I) -> Result<(), BotError>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let nicks: Vec<String> = nicks.into_iter().map(Into::into).collect();
        self.executor()
            .submit(move |state| state.ignore.extend(nicks))
            .await?;
        Ok(())
    }

    pub async fn unignore<I, T>(&self, nicks: I) -> Result<(), BotError>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let nicks: Vec<String> = nicks.into_iter().map(Into::into).collect();
        self.executor()
            .submit(move |state| {
                for nick in &nicks {
                    state.ignore.remove(nick);
                }
            })
            .await?;
        Ok(())
    }

    pub async fn is_ignored(&self, nick: &str) -> Result<bool, BotError> {
        let nick = nick.to_string();
        Ok(self.executor().submit(move |state| state.ignore.contains(&nick)).await?)
    }

    /// Markdown describing the built-in commands in the published list
    pub async fn builtin_commands_info(&self) -> Result<String, BotError> {
        Ok(self.executor().submit(|state| state.builtin_info.clone()).await?)
    }

    pub async fn set_builtin_commands_info(&self, info: impl Into<String>) -> Result<(), BotError> {
        let info = info.into();
        self.executor().submit(move |state| state.builtin_info = info).await?;
        Ok(())
    }

    /// Routes one chat message
    pub async fn handle_message(&self, message: ChatMessage) -> Dispatch {
        self.inner.router.route(self, message).await
    }

    /// Handles one protocol event
    pub async fn handle_event(&self, event: ChatEvent, autojoin: &[String]) -> Result<(), BotError> {
        match event {
            ChatEvent::Connected => {
                self.inner.transport.send_raw("CAP REQ :twitch.tv/membership")?;
                // After a reconnect the server has forgotten our channels
                for channel in self.channels().await? {
                    tracing::info!("Rejoining {}", channel);
                    self.inner.transport.join(&channel)?;
                }
                for channel in autojoin {
                    if let Err(e) = self.join(channel).await {
                        tracing::error!("Failed to join {}: {}", channel, e);
                    }
                }
            }
            ChatEvent::Message(message) => {
                self.handle_message(message).await;
            }
            ChatEvent::Mode { channel, op, mode, nick } => {
                tracing::debug!("MODE {} {}{} {}", channel, op, mode, nick);
                if mode != 'o' {
                    return Ok(());
                }
                let handle = self.channel(&channel);
                match op {
                    '+' => handle.add_mod(&nick).await?,
                    '-' => handle.remove_mod(&nick).await?,
                    _ => {}
                }
            }
            ChatEvent::Disconnected => {
                tracing::warn!("Disconnected from chat server");
            }
        }
        Ok(())
    }

    /// Serves events until the stream ends or Ctrl-C, then drains the executor.
    ///
    /// Each event is handled in its own task. A transport that reconnects
    /// keeps the stream open and sends `Connected` again.
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<ChatEvent>, autojoin: Vec<String>) {
        let autojoin = Arc::new(autojoin);
        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        tracing::info!("Event stream closed");
                        break;
                    };
                    let session = self.clone();
                    let autojoin = autojoin.clone();
                    tokio::spawn(async move {
                        if let Err(e) = session.handle_event(event, &autojoin).await {
                            tracing::warn!("Event handling failed: {}", e);
                        }
                    });
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Interrupted");
                    break;
                }
            }
        }
        self.shutdown().await;
    }

    /// Stops accepting work and waits for queued work to finish
    pub async fn shutdown(&self) {
        self.inner.executor.close();
        self.inner.executor.join().await;
    }
}

/// Access to one channel's state through the session executor.
#[derive(Clone)]
pub struct ChannelHandle {
    session: BotSession,
    name: String,
}

impl ChannelHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Login name of the channel owner
    pub fn login(&self) -> &str {
        self.name.trim_start_matches('#')
    }

    pub fn session(&self) -> &BotSession {
        &self.session
    }

    /// Runs `job` against this channel on the executor
    async fn with_channel<F, R>(&self, job: F) -> Result<R, BotError>
    where
        F: FnOnce(&mut ChannelState, &dyn CommandStore) -> R + Send + 'static,
        R: Send + 'static,
    {
        let name = self.name.clone();
        self.session
            .executor()
            .submit(move |state| {
                let BotState { channels, store, .. } = state;
                channels.get_mut(&name).map(|channel| job(channel, store.as_ref()))
            })
            .await?
            .ok_or_else(|| BotError::ChannelNotJoined(self.name.clone()))
    }

    pub async fn add_command(&self, name: &str, text: &str) -> Result<(), BotError> {
        let (name, text) = (name.to_string(), text.to_string());
        Ok(self
            .with_channel(move |channel, store| channel.add_command(store, &name, &text))
            .await??)
    }

    pub async fn remove_command(&self, name: &str) -> Result<(), BotError> {
        let name = name.to_string();
        Ok(self
            .with_channel(move |channel, store| channel.remove_command(store, &name))
            .await??)
    }

    pub async fn edit_command(&self, name: &str, text: &str) -> Result<(), BotError> {
        let (name, text) = (name.to_string(), text.to_string());
        Ok(self
            .with_channel(move |channel, store| channel.edit_command(store, &name, &text))
            .await??)
    }

    pub async fn set_command_mod(&self, name: &str, mod_only: bool) -> Result<(), BotError> {
        let name = name.to_string();
        Ok(self
            .with_channel(move |channel, store| channel.set_command_mod(store, &name, mod_only))
            .await??)
    }

    pub async fn command_exists(&self, name: &str) -> Result<bool, BotError> {
        let name = name.to_string();
        self.with_channel(move |channel, _| channel.command_exists(&name)).await
    }

    /// Text and mod-only flag of a command
    pub async fn command(&self, name: &str) -> Result<Option<(String, bool)>, BotError> {
        let name = name.to_string();
        self.with_channel(move |channel, _| channel.command(&name).map(|c| (c.text.clone(), c.mod_only)))
            .await
    }

    /// Runs a text command for `nick` and sends its reply.
    /// Returns false if the command doesn't exist.
    pub async fn invoke(&self, name: &str, nick: &str) -> Result<bool, BotError> {
        let (name, nick) = (name.to_string(), nick.to_string());
        let invocation = self
            .with_channel(move |channel, _| channel.invoke(&name, &nick, Instant::now()))
            .await?;
        if let Invocation::Reply(text) = &invocation {
            self.send(text);
        }
        Ok(invocation.handled())
    }

    pub async fn add_mod(&self, nick: &str) -> Result<(), BotError> {
        let nick = nick.to_string();
        self.with_channel(move |channel, _| channel.add_mod(&nick)).await
    }

    pub async fn remove_mod(&self, nick: &str) -> Result<(), BotError> {
        let nick = nick.to_string();
        self.with_channel(move |channel, _| channel.remove_mod(&nick)).await
    }

    pub async fn is_mod(&self, nick: &str) -> Result<bool, BotError> {
        let nick = nick.to_string();
        self.with_channel(move |channel, _| channel.is_mod(&nick)).await
    }

    pub async fn command_list(&self, separator: &str, mod_prefix: &str, include_text: bool) -> Result<String, BotError> {
        let (separator, mod_prefix) = (separator.to_string(), mod_prefix.to_string());
        self.with_channel(move |channel, _| channel.command_list(&separator, &mod_prefix, include_text))
            .await
    }

    pub async fn cooldown_ms(&self) -> Result<i32, BotError> {
        self.with_channel(|channel, _| channel.cooldown_ms()).await
    }

    /// Sets the command cooldown; negative values become zero
    pub async fn set_cooldown_ms(&self, ms: i64) -> Result<i32, BotError> {
        self.with_channel(move |channel, _| channel.set_cooldown_ms(ms)).await
    }

    /// Checks and stamps the cooldown of a built-in command
    pub async fn builtin_ready(&self, builtin: &str) -> Result<bool, BotError> {
        let builtin = builtin.to_string();
        self.with_channel(move |channel, _| channel.builtin_ready(&builtin, Instant::now()))
            .await
    }

    /// Sends a rate-limited message to this channel
    pub fn send(&self, text: &str) {
        self.session.send(&self.name, text);
    }

    /// URL of the published command list, empty if never published
    pub async fn gist_url(&self) -> Result<String, BotError> {
        let name = self.name.clone();
        Ok(self
            .session
            .executor()
            .submit(move |state| state.store.get_gist_url(&name))
            .await??)
    }

    pub(crate) async fn set_gist_url(&self, url: &str) -> Result<(), BotError> {
        let (name, url) = (self.name.clone(), url.to_string());
        Ok(self
            .session
            .executor()
            .submit(move |state| attempt_query(|| state.store.set_gist_url(&name, &url)))
            .await??)
    }

    /// Adds a `help` command pointing at the published list, if missing.
    async fn ensure_help(&self, url: &str) -> Result<(), BotError> {
        let text = format!("Command list: {}", url);
        let added = self
            .with_channel(move |channel, store| {
                if channel.command_exists("help") {
                    return Ok(());
                }
                channel.add_command(store, "help", &text)
            })
            .await?;
        if let Err(e) = added {
            tracing::warn!("{}> Failed to add help command: {}", self.name, e);
        }
        Ok(())
    }

    /// Renders and publishes this channel's command list.
    pub async fn refresh_command_list(&self) -> Result<(), BotError> {
        let Some(publisher) = self.session.publisher().cloned() else {
            tracing::debug!("{}> No command list publisher configured", self.name);
            return Ok(());
        };

        let list = self.command_list("\n", "+", true).await?;
        let info = self.session.builtin_commands_info().await?;
        let url = self.gist_url().await?;

        let document = command_list::render(&self.session.settings().bot_name, &self.name, &info, &list);
        let files = vec![(command_list::file_name(&self.name), document)];
        let description = command_list::description(&self.session.settings().bot_name, &self.name);

        if url.is_empty() {
            let url = publisher.publish(&files, &description).await?;
            tracing::info!("{}> Published command list at {}", self.name, url);
            self.set_gist_url(&url).await?;
        } else {
            publisher.update(&files, &url, &description).await?;
            tracing::info!("{}> Updated command list at {}", self.name, url);
        }
        Ok(())
    }

    /// Refreshes the published list in the background
    pub fn spawn_refresh(&self) {
        let handle = self.clone();
        tokio::spawn(async move {
            if let Err(e) = handle.refresh_command_list().await {
                tracing::warn!("{}> Failed to update command list, will retry next time: {}", handle.name, e);
            }
        });
    }
}
