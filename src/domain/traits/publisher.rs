use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::application::errors::BotError;

/// A file to publish: (file name, content)
pub type PublishedFile = (String, String);

/// Publishes human readable command lists to an external host.
#[async_trait]
pub trait GistPublisher: Send + Sync {
    /// Creates a new document and returns its URL
    async fn publish(&self, files: &[PublishedFile], description: &str) -> Result<String, BotError>;

    /// Replaces the content of a previously published document
    async fn update(&self, files: &[PublishedFile], url: &str, description: &str) -> Result<(), BotError>;
}

/// Tells whether a channel is currently live.
#[async_trait]
pub trait StreamStatus: Send + Sync {
    /// Start time of the current broadcast, `None` when offline
    async fn live_since(&self, channel: &str) -> Result<Option<DateTime<Utc>>, BotError>;
}
