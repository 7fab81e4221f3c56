//! Application layer - Use cases and business logic
//!
//! This layer contains:
//! - Executor: the serial executor that owns all mutable bot state
//! - Services: session, built-in commands, outbound messages, command lists
//! - Errors: Domain-specific errors
//! - Messaging: Message parsing, middleware, dispatching

pub mod errors;
pub mod executor;
pub mod messaging;
pub mod services;
