//! Chat transports

pub mod console;
pub mod irc;

pub use console::ConsoleTransport;
pub use irc::{IrcClient, ParsedLine, ReconnectPolicy};
