//! chanbot - a Twitch chat bot with per-channel text commands
//!
//! Channels, commands and the outbound message budget live in a
//! [`BotSession`], which serializes every mutation through one executor.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::errors::{BotError, CommandError};
pub use application::messaging::{Dispatch, Middleware, PreHook};
pub use application::services::{BotSession, BotSessionBuilder, BuiltinCommand, ChannelHandle, CommandContext};
pub use domain::entities::{ChatEvent, ChatMessage, Invocation};
