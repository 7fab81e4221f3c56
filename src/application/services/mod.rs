//! Application services - Business logic orchestration

pub mod command_list;
pub mod command_service;
pub mod outbox;
pub mod session;

pub use command_service::{BuiltinCommand, CommandContext};
pub use outbox::Outbox;
pub use session::{BotSession, BotSessionBuilder, BotState, ChannelHandle};
