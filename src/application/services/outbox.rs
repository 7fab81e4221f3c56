//! Rate-limited outbound messages

use std::sync::Arc;
use std::time::Instant;

use rand::Rng;
use tokio::runtime::Handle;

use crate::application::executor::SerialExecutor;
use crate::application::services::session::BotState;
use crate::domain::entities::Admission;
use crate::domain::traits::Transport;

/// Sends chat messages through the session's rate limiter.
///
/// Accounting runs on the serial executor, so sends from different channels
/// share one budget. Messages over budget are retried later by a timer task,
/// never dropped and never blocking the caller.
#[derive(Clone)]
pub struct Outbox {
    executor: SerialExecutor<BotState>,
    transport: Arc<dyn Transport>,
    runtime: Handle,
    decorate: bool,
}

impl Outbox {
    pub fn new(
        executor: SerialExecutor<BotState>,
        transport: Arc<dyn Transport>,
        runtime: Handle,
        is_mod: bool,
    ) -> Self {
        Self {
            executor,
            transport,
            runtime,
            decorate: !is_mod,
        }
    }

    /// Queues `text` for `channel`
    pub fn send(&self, channel: &str, text: &str) {
        let outbox = self.clone();
        let channel = channel.to_string();
        let text = text.to_string();

        let queued = self.executor.execute(move |state| {
            match state.limiter.admit(Instant::now()) {
                Admission::Send => {
                    let line = outbox.decorate(&text);
                    if let Err(e) = outbox.transport.privmsg(&channel, &line) {
                        tracing::warn!("{}> Failed to send message: {}", channel, e);
                    }
                }
                Admission::Defer(delay) => {
                    tracing::warn!("Rate limit reached, postponing this message by {:?}", delay);
                    let retry = outbox.clone();
                    outbox.runtime.spawn(async move {
                        tokio::time::sleep(delay).await;
                        tracing::info!("Sending delayed message");
                        retry.send(&channel, &text);
                    });
                }
            }
        });

        if let Err(e) = queued {
            tracing::warn!("Dropping message, {}", e);
        }
    }

    /// Appends a random suffix so the platform doesn't swallow repeated
    /// messages from a non-moderator account.
    fn decorate(&self, text: &str) -> String {
        if self.decorate {
            format!("{} [{}]", text, rand::rng().random_range(0..99))
        } else {
            text.to_string()
        }
    }
}
