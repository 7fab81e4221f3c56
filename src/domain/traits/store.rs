use std::collections::HashMap;

use crate::application::errors::StorageError;
use crate::domain::entities::TextCommand;

/// Store trait - persistence for channel commands and published list URLs.
///
/// Calls are synchronous; the store is owned by the serial executor's worker
/// and only ever touched from there.
pub trait CommandStore: Send {
    /// Loads every persisted command of a channel
    fn get_commands(&self, channel: &str) -> Result<HashMap<String, TextCommand>, StorageError>;

    /// Inserts or updates a command
    fn set_command(&self, channel: &str, name: &str, text: &str, mod_only: bool) -> Result<(), StorageError>;

    /// Removes a command. Removing a command that isn't stored is not an error.
    fn remove_command(&self, channel: &str, name: &str) -> Result<(), StorageError>;

    /// URL of the channel's published command list, empty if never published
    fn get_gist_url(&self, channel: &str) -> Result<String, StorageError>;

    fn set_gist_url(&self, channel: &str, url: &str) -> Result<(), StorageError>;
}
