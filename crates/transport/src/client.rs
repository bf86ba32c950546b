use std::{future::Future, marker::PhantomData, pin::Pin, sync::Arc, time::Duration};

use {
    futures::{SinkExt, StreamExt},
    serde::{Serialize, de::DeserializeOwned},
    tokio::sync::{Mutex, mpsc, watch},
    tokio_tungstenite::tungstenite::{Error as WsError, Message, error::ProtocolError},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    connector::{Connector, FrameSink, FrameStream},
    error::{Error, Result},
    state::TransportState,
};

/// Hook fired after every successful (re)connection.
pub type OnConnectFn<M> =
    Arc<dyn Fn(Transport<M>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Tunables for the read and reconnect loops.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Capacity of the inbound buffer between the read and dispatch loops.
    pub buffer_capacity: usize,
    /// Delay between reconnect attempts.
    pub reconnect_delay: Duration,
    /// Delay before re-reading after a transient read error.
    pub read_retry_delay: Duration,
    /// Bounded wait for buffer space before logging backpressure.
    pub enqueue_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 5,
            reconnect_delay: Duration::from_secs(2),
            read_retry_delay: Duration::from_secs(2),
            enqueue_timeout: Duration::from_secs(1),
        }
    }
}

struct Inner<M> {
    connector: Arc<dyn Connector>,
    config: TransportConfig,
    sink: Mutex<Option<FrameSink>>,
    stream: Mutex<Option<FrameStream>>,
    state: watch::Sender<TransportState>,
    on_connect: Option<OnConnectFn<M>>,
}

/// A reconnecting connection carrying inbound messages of type `M`.
///
/// Cloning is cheap; clones share the same connection.
pub struct Transport<M> {
    inner: Arc<Inner<M>>,
    _message: PhantomData<fn() -> M>,
}

impl<M> Clone for Transport<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _message: PhantomData,
        }
    }
}

/// Builder for [`Transport`].
pub struct TransportBuilder<M> {
    connector: Arc<dyn Connector>,
    config: TransportConfig,
    on_connect: Option<OnConnectFn<M>>,
}

impl<M> TransportBuilder<M> {
    pub fn config(mut self, config: TransportConfig) -> Self {
        self.config = config;
        self
    }

    pub fn on_connect<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Transport<M>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_connect = Some(Arc::new(move |t| Box::pin(hook(t))));
        self
    }

    pub fn build(self) -> Transport<M> {
        let (state, _) = watch::channel(TransportState::Disconnected);
        Transport {
            inner: Arc::new(Inner {
                connector: self.connector,
                config: self.config,
                sink: Mutex::new(None),
                stream: Mutex::new(None),
                state,
                on_connect: self.on_connect,
            }),
            _message: PhantomData,
        }
    }
}

/// How a read session ended.
enum ReadEnd {
    Cancelled,
    DispatcherGone,
    Terminal(String),
}

impl<M> Transport<M>
where
    M: DeserializeOwned + Send + 'static,
{
    pub fn builder(connector: impl Connector + 'static) -> TransportBuilder<M> {
        TransportBuilder {
            connector: Arc::new(connector),
            config: TransportConfig::default(),
            on_connect: None,
        }
    }

    pub fn state(&self) -> TransportState {
        *self.inner.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<TransportState> {
        self.inner.state.subscribe()
    }

    pub fn endpoint(&self) -> &str {
        self.inner.connector.endpoint()
    }

    /// Establish the connection.
    ///
    /// On failure the transport stays `Disconnected` with no handle kept.
    pub async fn connect(&self) -> Result<()> {
        if self.state() == TransportState::Closed {
            return Err(Error::Closed);
        }
        self.set_state(TransportState::Connecting);
        info!(url = %self.endpoint(), "connecting");

        match self.inner.connector.connect().await {
            Ok((sink, stream)) => {
                *self.inner.sink.lock().await = Some(sink);
                *self.inner.stream.lock().await = Some(stream);
                self.set_state(TransportState::Connected);
                info!(url = %self.endpoint(), "connected");
                if let Some(hook) = &self.inner.on_connect {
                    tokio::spawn(hook(self.clone()));
                }
                Ok(())
            },
            Err(e) => {
                self.drop_handles().await;
                self.set_state(TransportState::Disconnected);
                Err(e)
            },
        }
    }

    /// Serialize `message` as a JSON text frame and write it.
    ///
    /// Fails fast with [`Error::NotConnected`] when there is no live
    /// connection. Write failures are returned; reconnecting is left to the
    /// read loop.
    pub async fn send<T: Serialize + ?Sized>(&self, message: &T) -> Result<()> {
        let text = serde_json::to_string(message)?;
        let mut guard = self.inner.sink.lock().await;
        let sink = guard.as_mut().ok_or(Error::NotConnected)?;
        sink.send(Message::Text(text.into())).await?;
        Ok(())
    }

    /// Drive the connection until `cancel` fires.
    ///
    /// Frames are decoded in a spawned read loop and handed to `on_message`
    /// one at a time, in arrival order. Returns only after cancellation, with
    /// the connection closed and the transport `Closed`.
    pub async fn run<F, Fut>(&self, cancel: CancellationToken, mut on_message: F) -> Result<()>
    where
        F: FnMut(M) -> Fut + Send,
        Fut: Future<Output = ()> + Send,
    {
        if self.state() == TransportState::Closed {
            return Err(Error::Closed);
        }

        let (tx, mut rx) = mpsc::channel(self.inner.config.buffer_capacity.max(1));
        let reader = tokio::spawn(self.clone().read_loop(tx, cancel.clone()));

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                msg = rx.recv() => match msg {
                    Some(msg) => on_message(msg).await,
                    None => break,
                },
            }
        }

        drop(rx);
        if let Err(e) = reader.await {
            warn!(error = %e, "read loop task failed");
        }
        self.close().await;
        Ok(())
    }

    /// Close the connection for good. Later sends fail with `NotConnected`.
    pub async fn close(&self) {
        if let Some(mut sink) = self.inner.sink.lock().await.take() {
            if let Err(e) = sink.close().await {
                debug!(error = %e, "error closing websocket");
            }
        }
        self.inner.stream.lock().await.take();
        self.set_state(TransportState::Closed);
        info!(url = %self.endpoint(), "transport closed");
    }

    // ── Internal ────────────────────────────────────────────────────────────

    fn set_state(&self, state: TransportState) {
        let prev = self.inner.state.send_replace(state);
        if prev != state {
            debug!(url = %self.endpoint(), from = %prev, to = %state, "transport state");
        }
    }

    async fn drop_handles(&self) {
        self.inner.sink.lock().await.take();
        self.inner.stream.lock().await.take();
    }

    async fn read_loop(self, tx: mpsc::Sender<M>, cancel: CancellationToken) {
        let delay = self.inner.config.reconnect_delay;
        loop {
            if cancel.is_cancelled() || self.state() == TransportState::Closed {
                return;
            }

            let stream = self.inner.stream.lock().await.take();
            let mut stream = match stream {
                Some(stream) => stream,
                None => {
                    let connected = tokio::select! {
                        _ = cancel.cancelled() => return,
                        res = self.connect() => res,
                    };
                    if let Err(e) = connected {
                        warn!(url = %self.endpoint(), error = %e, "connect failed, retrying");
                        if !sleep_or_cancel(&cancel, delay).await {
                            return;
                        }
                        continue;
                    }
                    match self.inner.stream.lock().await.take() {
                        Some(stream) => stream,
                        None => continue,
                    }
                },
            };

            match self.read_session(&mut stream, &tx, &cancel).await {
                ReadEnd::Cancelled | ReadEnd::DispatcherGone => return,
                ReadEnd::Terminal(reason) => {
                    warn!(url = %self.endpoint(), reason = %reason, "connection lost, reconnecting");
                    drop(stream);
                    self.drop_handles().await;
                    self.set_state(TransportState::Disconnected);
                    if !sleep_or_cancel(&cancel, delay).await {
                        return;
                    }
                },
            }
        }
    }

    /// Read frames from one live connection until it ends.
    async fn read_session(
        &self,
        stream: &mut FrameStream,
        tx: &mpsc::Sender<M>,
        cancel: &CancellationToken,
    ) -> ReadEnd {
        let retry = self.inner.config.read_retry_delay;
        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => return ReadEnd::Cancelled,
                frame = stream.next() => frame,
            };

            let payload = match frame {
                None => return ReadEnd::Terminal("stream ended".into()),
                Some(Err(e)) if is_terminal(&e) => return ReadEnd::Terminal(e.to_string()),
                Some(Err(e)) => {
                    warn!(url = %self.endpoint(), error = %e, "read error, retrying");
                    if !sleep_or_cancel(cancel, retry).await {
                        return ReadEnd::Cancelled;
                    }
                    continue;
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame.map_or_else(
                        || "closed by peer".to_string(),
                        |f| format!("closed by peer ({})", f.code),
                    );
                    return ReadEnd::Terminal(reason);
                },
                Some(Ok(Message::Text(text))) => serde_json::from_str::<M>(text.as_str()),
                Some(Ok(Message::Binary(data))) => serde_json::from_slice::<M>(&data),
                Some(Ok(_)) => continue,
            };

            let msg = match payload {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(url = %self.endpoint(), error = %e, "undecodable frame, retrying");
                    if !sleep_or_cancel(cancel, retry).await {
                        return ReadEnd::Cancelled;
                    }
                    continue;
                },
            };

            if let Some(end) = self.enqueue(msg, tx, cancel).await {
                return end;
            }
        }
    }

    /// Push into the bounded buffer, waiting in bounded slices while it is full.
    async fn enqueue(
        &self,
        msg: M,
        tx: &mpsc::Sender<M>,
        cancel: &CancellationToken,
    ) -> Option<ReadEnd> {
        let wait = self.inner.config.enqueue_timeout;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Some(ReadEnd::Cancelled),
                reserved = tokio::time::timeout(wait, tx.reserve()) => match reserved {
                    Ok(Ok(permit)) => {
                        permit.send(msg);
                        return None;
                    },
                    Ok(Err(_)) => return Some(ReadEnd::DispatcherGone),
                    Err(_) => {
                        warn!(
                            url = %self.endpoint(),
                            capacity = self.inner.config.buffer_capacity,
                            "inbound buffer full, dispatcher is behind"
                        );
                    },
                },
            }
        }
    }
}

/// Errors after which the connection cannot be read again.
fn is_terminal(err: &WsError) -> bool {
    matches!(
        err,
        WsError::ConnectionClosed
            | WsError::AlreadyClosed
            | WsError::Io(_)
            | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake)
    )
}

/// Returns `false` when cancelled before the delay elapsed.
async fn sleep_or_cancel(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
