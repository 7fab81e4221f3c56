//! Message handling - parsing, hooks and command routing

pub mod dispatcher;
pub mod middleware;
pub mod parser;

pub use dispatcher::{CommandRouter, Dispatch};
pub use middleware::{LoggingMiddleware, Middleware, MiddlewareChain, PreHook};
pub use parser::MessageParser;
