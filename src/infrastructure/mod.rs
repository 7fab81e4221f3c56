//! Infrastructure layer - External concerns
//!
//! This layer contains:
//! - Config: Configuration loading
//! - Database: Command persistence
//! - Adapters: Chat transports (Twitch IRC, console)
//! - Gist and status: HTTP APIs used by the built-in commands

pub mod adapters;
pub mod config;
pub mod database;
pub mod gist;
pub mod status;
