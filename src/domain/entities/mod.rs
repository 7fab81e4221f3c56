//! Domain entities - Core business objects with no external dependencies

pub mod channel;
pub mod command;
pub mod message;
pub mod rate_limit;

pub use channel::ChannelState;
pub use command::{Invocation, TextCommand};
pub use message::{ChatEvent, ChatMessage, Content};
pub use rate_limit::{Admission, RateLimiter};
