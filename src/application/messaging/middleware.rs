//! Middleware - pre/post hooks around inbound message handling

use std::sync::Arc;

use super::dispatcher::Dispatch;
use crate::domain::entities::ChatMessage;

/// Hooks that run around the routing of every chat message
pub trait Middleware: Send + Sync {
    /// Runs before routing. Returning false stops the message here.
    fn before(&self, _message: &ChatMessage) -> bool {
        true
    }

    /// Runs after routing with the outcome
    fn after(&self, _message: &ChatMessage, _dispatch: &Dispatch) {}
}

/// Ordered list of middleware
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(middlewares: Vec<Arc<dyn Middleware>>) -> Self {
        Self { middlewares }
    }

    pub fn add<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Runs every `before` hook in order, stopping at the first refusal
    pub fn before(&self, message: &ChatMessage) -> bool {
        self.middlewares.iter().all(|m| m.before(message))
    }

    pub fn after(&self, message: &ChatMessage, dispatch: &Dispatch) {
        for middleware in &self.middlewares {
            middleware.after(message, dispatch);
        }
    }
}

/// Pre-hook built from a closure. The message continues when it returns true.
pub struct PreHook<F>(pub F);

impl<F> Middleware for PreHook<F>
where
    F: Fn(&ChatMessage) -> bool + Send + Sync,
{
    fn before(&self, message: &ChatMessage) -> bool {
        (self.0)(message)
    }
}

/// Logs every chat line and its outcome
pub struct LoggingMiddleware;

impl Middleware for LoggingMiddleware {
    fn before(&self, message: &ChatMessage) -> bool {
        tracing::info!("{}> {}: {}", message.channel, message.nick, message.text);
        true
    }

    fn after(&self, message: &ChatMessage, dispatch: &Dispatch) {
        if !matches!(dispatch, Dispatch::Filtered) {
            tracing::debug!("{}> {:?}", message.channel, dispatch);
        }
    }
}
