//! Personal-messaging platform binding.
//!
//! Inbound messages arrive on a sync WebSocket and are adapted into
//! [`parley_channels::NormalizedMessage`]; outbound operations go through
//! the provider's HTTP API, authenticated with a `key` query parameter.

pub mod adapter;
pub mod client;
pub mod error;
pub mod inbound;
pub mod login;
pub mod render;
pub mod types;

pub use {
    client::{WechatClient, WechatClientBuilder},
    error::{Error, Result},
    inbound::{SyncTransport, run_inbound, sync_endpoint, sync_transport},
    login::ensure_online,
    types::SyncMessage,
};
