use rusqlite::{Connection, OptionalExtension, Result as SqliteResult};
use std::collections::HashMap;
use std::path::Path;

use crate::application::errors::StorageError;
use crate::domain::entities::TextCommand;
use crate::domain::traits::CommandStore;

/// SQLite store for channel commands and published command list URLs
pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn new(path: impl AsRef<Path>) -> SqliteResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init_tables()?;
        Ok(db)
    }

    /// A throwaway database, for tests and the console mode
    pub fn in_memory() -> SqliteResult<Self> {
        let db = Self {
            conn: Connection::open_in_memory()?,
        };
        db.init_tables()?;
        Ok(db)
    }

    fn init_tables(&self) -> SqliteResult<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS commands (
                channel TEXT NOT NULL,
                name TEXT NOT NULL,
                reply TEXT NOT NULL,
                mod_only INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS gists (
                channel TEXT NOT NULL,
                url TEXT NOT NULL
            )",
            [],
        )?;

        // Create indexes
        self.conn.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS commands_index ON commands(channel, name)",
            [],
        )?;

        self.conn.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS gists_index ON gists(channel)",
            [],
        )?;

        Ok(())
    }
}

impl CommandStore for Database {
    fn get_commands(&self, channel: &str) -> Result<HashMap<String, TextCommand>, StorageError> {
        tracing::debug!("DB: Getting commands for {}", channel);
        let mut stmt = self
            .conn
            .prepare("SELECT name, reply, mod_only FROM commands WHERE channel = ?1")?;

        let rows = stmt.query_map([channel], |row| {
            let name: String = row.get(0)?;
            let reply: String = row.get(1)?;
            let mod_only: bool = row.get(2)?;
            Ok((name, TextCommand::new(reply).with_mod_only(mod_only)))
        })?;

        let mut commands = HashMap::new();
        for row in rows {
            let (name, command) = row?;
            commands.insert(name, command);
        }
        Ok(commands)
    }

    fn set_command(&self, channel: &str, name: &str, text: &str, mod_only: bool) -> Result<(), StorageError> {
        tracing::debug!("DB: Setting command {} for {}", name, channel);
        self.conn.execute(
            "INSERT INTO commands (channel, name, reply, mod_only) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(channel, name) DO UPDATE SET reply = excluded.reply, mod_only = excluded.mod_only",
            rusqlite::params![channel, name, text, mod_only],
        )?;
        Ok(())
    }

    fn remove_command(&self, channel: &str, name: &str) -> Result<(), StorageError> {
        tracing::debug!("DB: Removing command {} for {}", name, channel);
        self.conn.execute(
            "DELETE FROM commands WHERE channel = ?1 AND name = ?2",
            [channel, name],
        )?;
        Ok(())
    }

    fn get_gist_url(&self, channel: &str) -> Result<String, StorageError> {
        let url: Option<String> = self
            .conn
            .query_row("SELECT url FROM gists WHERE channel = ?1", [channel], |row| row.get(0))
            .optional()?;
        Ok(url.unwrap_or_default())
    }

    fn set_gist_url(&self, channel: &str, url: &str) -> Result<(), StorageError> {
        tracing::debug!("DB: Setting gist for {}", channel);
        self.conn.execute(
            "INSERT INTO gists (channel, url) VALUES (?1, ?2)
             ON CONFLICT(channel) DO UPDATE SET url = excluded.url",
            [channel, url],
        )?;
        Ok(())
    }
}
