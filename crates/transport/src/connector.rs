use std::pin::Pin;

use {
    async_trait::async_trait,
    futures::{Sink, Stream, StreamExt},
    tokio_tungstenite::{
        connect_async,
        tungstenite::{Error as WsError, Message},
    },
    tracing::debug,
};

use crate::error::Result;

/// Write half of a connection.
pub type FrameSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;

/// Read half of a connection.
pub type FrameStream = Pin<Box<dyn Stream<Item = std::result::Result<Message, WsError>> + Send>>;

/// Opens the underlying connection for a [`Transport`](crate::Transport).
///
/// Every reconnect calls [`Connector::connect`] again with the same
/// endpoint and credentials.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Endpoint for logs. Must not contain credentials.
    fn endpoint(&self) -> &str;

    async fn connect(&self) -> Result<(FrameSink, FrameStream)>;
}

/// Plain WebSocket connector (`ws://` or `wss://`).
pub struct WsConnector {
    url: String,
    display: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let display = redact_query(&url);
        Self { url, display }
    }
}

#[async_trait]
impl Connector for WsConnector {
    fn endpoint(&self) -> &str {
        &self.display
    }

    async fn connect(&self) -> Result<(FrameSink, FrameStream)> {
        let (ws_stream, response) = connect_async(self.url.as_str()).await?;
        debug!(url = %self.display, status = %response.status(), "websocket handshake done");
        let (sink, stream) = ws_stream.split();
        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

/// Drop the query string; tokens travel as query parameters.
fn redact_query(url: &str) -> String {
    match url.split_once('?') {
        Some((base, _)) => format!("{base}?…"),
        None => url.to_string(),
    }
}
