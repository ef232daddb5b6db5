use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use shared::protocol::ClientRequest;
use tokio::{
    net::TcpStream,
    sync::{broadcast, mpsc, watch, Mutex as AsyncMutex, Notify},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

use super::{decode_frame, encode_request, ChannelClient, ChannelEvent, ConnectionState};
use crate::error::{SyncError, SyncResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    pub attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(1_000),
            attempts: 5,
        }
    }
}

/// Websocket transport. Frames are JSON [`ClientRequest`] / `ServerEvent` values.
pub struct WsChannelClient {
    endpoint: Url,
    reconnect: ReconnectPolicy,
    events: broadcast::Sender<ChannelEvent>,
    state: watch::Sender<ConnectionState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<ClientRequest>>>,
    shutdown: Mutex<Option<Arc<Notify>>>,
    task: AsyncMutex<Option<JoinHandle<()>>>,
}

impl WsChannelClient {
    pub fn new(endpoint: Url, reconnect: ReconnectPolicy, event_buffer: usize) -> Self {
        let (events, _) = broadcast::channel(event_buffer.max(1));
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            endpoint,
            reconnect,
            events,
            state,
            outbound: Mutex::new(None),
            shutdown: Mutex::new(None),
            task: AsyncMutex::new(None),
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl ChannelClient for WsChannelClient {
    async fn connect(&self) -> SyncResult<()> {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(());
        }

        self.state.send_replace(ConnectionState::Connecting);
        let stream = match open(&self.endpoint).await {
            Ok(stream) => stream,
            Err(err) => {
                self.state.send_replace(ConnectionState::Disconnected);
                return Err(err);
            }
        };

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        *self.outbound.lock().unwrap_or_else(PoisonError::into_inner) = Some(outbound_tx);
        let shutdown = Arc::new(Notify::new());
        *self.shutdown.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&shutdown));
        self.state.send_replace(ConnectionState::Connected);
        let _ = self.events.send(ChannelEvent::Connected);
        info!(endpoint = %self.endpoint, "channel: connected");

        let connection = Connection {
            endpoint: self.endpoint.clone(),
            reconnect: self.reconnect,
            events: self.events.clone(),
            state: self.state.clone(),
            shutdown,
        };
        *task = Some(tokio::spawn(connection.run(stream, outbound_rx)));
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn publish(&self, request: ClientRequest) -> SyncResult<()> {
        if self.state() != ConnectionState::Connected {
            return Err(SyncError::ChannelClosed);
        }
        let outbound = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        outbound
            .as_ref()
            .ok_or(SyncError::ChannelClosed)?
            .send(request)
            .map_err(|_| SyncError::ChannelClosed)
    }

    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    async fn close(&self) -> SyncResult<()> {
        if let Some(shutdown) = self
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            shutdown.notify_one();
        }
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = self.task.lock().await.take() {
            if let Err(err) = handle.await {
                warn!("channel: connection task ended abnormally: {err}");
            }
        }
        self.state.send_replace(ConnectionState::Disconnected);
        Ok(())
    }
}

async fn open(endpoint: &Url) -> SyncResult<WsStream> {
    let (stream, _) = connect_async(endpoint.as_str())
        .await
        .map_err(|err| SyncError::Transport(format!("failed to connect websocket {endpoint}: {err}")))?;
    Ok(stream)
}

struct Connection {
    endpoint: Url,
    reconnect: ReconnectPolicy,
    events: broadcast::Sender<ChannelEvent>,
    state: watch::Sender<ConnectionState>,
    shutdown: Arc<Notify>,
}

impl Connection {
    async fn run(self, mut stream: WsStream, mut outbound: mpsc::UnboundedReceiver<ClientRequest>) {
        loop {
            let Some(reason) = self.pump(stream, &mut outbound).await else {
                self.state.send_replace(ConnectionState::Disconnected);
                debug!("channel: closed by client");
                return;
            };

            self.state.send_replace(ConnectionState::Disconnected);
            warn!(%reason, "channel: connection lost");
            let _ = self.events.send(ChannelEvent::Disconnected { reason });

            let mut dropped = 0usize;
            while outbound.try_recv().is_ok() {
                dropped += 1;
            }
            if dropped > 0 {
                warn!(dropped, "channel: discarded requests queued for the lost connection");
            }

            match self.reopen().await {
                Some(next) => {
                    stream = next;
                    self.state.send_replace(ConnectionState::Connected);
                    let _ = self.events.send(ChannelEvent::Reconnected);
                    info!(endpoint = %self.endpoint, "channel: reconnected");
                }
                None => {
                    error!(
                        endpoint = %self.endpoint,
                        attempts = self.reconnect.attempts,
                        "channel: giving up after reconnect attempts"
                    );
                    return;
                }
            }
        }
    }

    /// Moves frames both ways until the connection ends. `None` means a client-side close.
    async fn pump(
        &self,
        stream: WsStream,
        outbound: &mut mpsc::UnboundedReceiver<ClientRequest>,
    ) -> Option<String> {
        let (mut sink, mut source) = stream.split();
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return None;
                }
                frame = source.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(event) = decode_frame(&text) {
                            let _ = self.events.send(ChannelEvent::Server(event));
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return Some("server closed the connection".to_string());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return Some(format!("websocket receive failed: {err}")),
                },
                request = outbound.recv() => match request {
                    Some(request) => {
                        let text = match encode_request(&request) {
                            Ok(text) => text,
                            Err(err) => {
                                warn!("channel: failed to encode request: {err}");
                                continue;
                            }
                        };
                        if let Err(err) = sink.send(Message::Text(text)).await {
                            return Some(format!("websocket send failed: {err}"));
                        }
                    }
                    None => {
                        let _ = sink.send(Message::Close(None)).await;
                        return None;
                    }
                },
            }
        }
    }

    async fn reopen(&self) -> Option<WsStream> {
        for attempt in 0..self.reconnect.attempts {
            self.state.send_replace(ConnectionState::Connecting);
            tokio::select! {
                _ = self.shutdown.notified() => return None,
                _ = tokio::time::sleep(self.reconnect.delay) => {}
            }
            match open(&self.endpoint).await {
                Ok(stream) => return Some(stream),
                Err(err) => {
                    info!(
                        attempt = attempt + 1,
                        max_attempts = self.reconnect.attempts,
                        "channel: reconnect attempt failed: {err}"
                    );
                }
            }
        }
        self.state.send_replace(ConnectionState::Disconnected);
        None
    }
}
