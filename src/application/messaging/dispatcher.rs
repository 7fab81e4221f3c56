//! Command router - routes chat lines to built-in or text commands

use std::sync::Arc;
use std::time::Instant;

use super::middleware::{Middleware, MiddlewareChain};
use super::parser::MessageParser;
use crate::application::services::command_service::{BuiltinCommand, CommandContext};
use crate::application::services::session::BotSession;
use crate::domain::entities::{ChatMessage, Content, Invocation};

/// What happened to a chat line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Not a command, or stopped by a pre-hook
    Filtered,
    /// Ran the named built-in command
    Builtin(String),
    /// Reached a text command
    Text(Invocation),
    /// Unknown command, or a text command from an ignored nick
    Invalid,
    /// The channel isn't joined
    NotJoined,
}

/// A command name resolved against the session state in one lookup
enum Resolution {
    Builtin(Arc<dyn BuiltinCommand>),
    Text(Invocation),
    Invalid,
    NotJoined,
}

/// Parses chat lines and dispatches them
pub struct CommandRouter {
    parser: MessageParser,
    middleware: MiddlewareChain,
}

impl CommandRouter {
    pub fn new(parser: MessageParser, middleware: Vec<Arc<dyn Middleware>>) -> Self {
        Self {
            parser,
            middleware: MiddlewareChain::from_vec(middleware),
        }
    }

    /// Routes one message through the hooks and the command tables
    pub async fn route(&self, session: &BotSession, message: ChatMessage) -> Dispatch {
        if !self.middleware.before(&message) {
            return Dispatch::Filtered;
        }

        let dispatch = match self.parser.parse(&message.text) {
            Content::Command { name, args } => self.dispatch(session, &message, name, args).await,
            Content::Text(_) | Content::Empty => Dispatch::Filtered,
        };

        self.middleware.after(&message, &dispatch);
        dispatch
    }

    async fn dispatch(&self, session: &BotSession, message: &ChatMessage, name: String, args: Vec<String>) -> Dispatch {
        let channel = message.channel.clone();
        let nick = message.nick.clone();

        let resolution = {
            let (name, channel, nick) = (name.clone(), channel.clone(), nick.clone());
            session
                .executor()
                .submit(move |state| {
                    if let Some(handler) = state.builtins.get(&name) {
                        return Resolution::Builtin(handler.clone());
                    }
                    let ignored = state.ignore.contains(&nick);
                    let Some(channel) = state.channels.get_mut(&channel) else {
                        return Resolution::NotJoined;
                    };
                    if !ignored {
                        let invocation = channel.invoke(&name, &nick, Instant::now());
                        if invocation.handled() {
                            return Resolution::Text(invocation);
                        }
                    }
                    Resolution::Invalid
                })
                .await
        };

        let resolution = match resolution {
            Ok(resolution) => resolution,
            Err(e) => {
                tracing::warn!("{}> Dropping command {}: {}", channel, name, e);
                return Dispatch::Filtered;
            }
        };

        match resolution {
            Resolution::Builtin(handler) => {
                tracing::info!("{}> Processing command {} {:?}", channel, name, args);
                let context = CommandContext {
                    session: session.clone(),
                    channel,
                    args,
                    nick,
                };
                if let Err(e) = handler.run(context).await {
                    tracing::warn!("{}> Command {} failed: {}", message.channel, name, e);
                }
                Dispatch::Builtin(name)
            }
            Resolution::Text(invocation) => {
                if let Invocation::Reply(text) = &invocation {
                    session.send(&channel, text);
                }
                Dispatch::Text(invocation)
            }
            Resolution::Invalid => {
                tracing::info!("{}> Invalid command {}", channel, name);
                Dispatch::Invalid
            }
            Resolution::NotJoined => {
                tracing::debug!("Ignoring command {} for unjoined channel {}", name, channel);
                Dispatch::NotJoined
            }
        }
    }
}
