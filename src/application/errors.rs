//! Application layer errors

use thiserror::Error;

/// General bot errors
#[derive(Error, Debug)]
pub enum BotError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Command(#[from] CommandError),

    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not joined to channel {0}")]
    ChannelNotJoined(String),
}

/// Text command table errors. The display strings are sent back to chat.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Command {0} already exists.")]
    AlreadyExists(String),

    #[error("Command {0} doesn't exist.")]
    NotFound(String),

    #[error("Database error. Please try again.")]
    Store,
}

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Serial executor errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("executor is closed")]
    Closed,

    #[error("work item panicked")]
    Panicked,

    #[error("no tokio runtime available")]
    NoRuntime,
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
