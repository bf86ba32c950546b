//! Reconnecting duplex transport over WebSocket.
//!
//! One [`Transport`] keeps a single logical connection alive: a read loop
//! decodes frames into a bounded buffer, a dispatch loop hands them to the
//! caller in arrival order, and terminal read errors lead to a fixed-delay
//! reconnect. The payload type is a type parameter.

pub mod client;
pub mod connector;
pub mod error;
pub mod state;

pub use {
    client::{OnConnectFn, Transport, TransportBuilder, TransportConfig},
    connector::{Connector, FrameSink, FrameStream, WsConnector},
    error::{Error, Result},
    state::TransportState,
};
