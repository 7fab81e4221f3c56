//! Domain layer - Core business logic
//!
//! This layer contains:
//! - Entities: channel state, text commands, chat messages, the rate limiter
//! - Traits: abstractions for infrastructure (Transport, CommandStore, publishers)

pub mod entities;
pub mod traits;
