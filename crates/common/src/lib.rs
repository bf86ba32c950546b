//! Shared types, error definitions, and utilities used across all parley crates.

pub mod error;
pub mod identity;
pub mod time;

pub use {
    error::FromMessage,
    identity::BotIdentity,
};
