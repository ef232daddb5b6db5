use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, PoisonError,
};

use async_trait::async_trait;
use shared::protocol::{ClientRequest, InboundMessage, ServerEvent};
use tokio::sync::{broadcast, watch};
use tracing::debug;

use super::{ChannelClient, ChannelEvent, ConnectionState};
use crate::{
    error::{SyncError, SyncResult},
    reconciler::local_timestamp,
};

/// In-process channel with no server behind it.
///
/// Records every published request. Tests drive it by injecting events and
/// dropping or restoring the connection by hand. In echo mode it answers joins
/// and sends the way a permissive server would.
#[derive(Clone)]
pub struct LoopbackChannel {
    inner: Arc<Inner>,
}

struct Inner {
    events: broadcast::Sender<ChannelEvent>,
    state: watch::Sender<ConnectionState>,
    published: Mutex<Vec<ClientRequest>>,
    echo_as: Option<String>,
    connected_once: AtomicBool,
}

impl LoopbackChannel {
    pub fn new(event_buffer: usize) -> Self {
        Self::build(event_buffer, None)
    }

    /// Like [`LoopbackChannel::new`], but sends come back as `receive_message`
    /// events attributed to `sender_name`, and joins are acknowledged.
    pub fn echoing(event_buffer: usize, sender_name: impl Into<String>) -> Self {
        Self::build(event_buffer, Some(sender_name.into()))
    }

    fn build(event_buffer: usize, echo_as: Option<String>) -> Self {
        let (events, _) = broadcast::channel(event_buffer.max(1));
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                events,
                state,
                published: Mutex::new(Vec::new()),
                echo_as,
                connected_once: AtomicBool::new(false),
            }),
        }
    }

    pub fn inject(&self, event: ChannelEvent) {
        let _ = self.inner.events.send(event);
    }

    pub fn inject_server(&self, event: ServerEvent) {
        self.inject(ChannelEvent::Server(event));
    }

    pub fn published(&self) -> Vec<ClientRequest> {
        self.inner
            .published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn take_published(&self) -> Vec<ClientRequest> {
        std::mem::take(
            &mut *self
                .inner
                .published
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    pub fn drop_connection(&self, reason: impl Into<String>) {
        self.inner.state.send_replace(ConnectionState::Disconnected);
        self.inject(ChannelEvent::Disconnected {
            reason: reason.into(),
        });
    }

    pub fn restore_connection(&self) {
        self.inner.state.send_replace(ConnectionState::Connected);
        self.inject(ChannelEvent::Reconnected);
    }

    fn echo(&self, request: &ClientRequest) {
        let Some(sender_name) = &self.inner.echo_as else {
            return;
        };
        let event = match request {
            ClientRequest::Join { room } => ServerEvent::Joined { room: room.clone() },
            ClientRequest::Leave { .. } => return,
            ClientRequest::SendMessage(outbound) => ServerEvent::ReceiveMessage(InboundMessage {
                chat_id: outbound.chat_id.clone(),
                sender_id: outbound.sender_id.clone(),
                sender_name: sender_name.clone(),
                avatar: String::new(),
                content: outbound.content.clone(),
                timestamp: local_timestamp(),
                client_msg_id: outbound.client_msg_id.clone(),
            }),
        };
        self.inject_server(event);
    }
}

#[async_trait]
impl ChannelClient for LoopbackChannel {
    async fn connect(&self) -> SyncResult<()> {
        if self.state() == ConnectionState::Connected {
            return Ok(());
        }
        self.inner.state.send_replace(ConnectionState::Connected);
        if self.inner.connected_once.swap(true, Ordering::SeqCst) {
            self.inject(ChannelEvent::Reconnected);
        } else {
            self.inject(ChannelEvent::Connected);
        }
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    fn publish(&self, request: ClientRequest) -> SyncResult<()> {
        if self.state() != ConnectionState::Connected {
            return Err(SyncError::ChannelClosed);
        }
        debug!(?request, "loopback: publish");
        self.inner
            .published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        self.echo(&request);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.inner.events.subscribe()
    }

    async fn close(&self) -> SyncResult<()> {
        self.inner.state.send_replace(ConnectionState::Disconnected);
        Ok(())
    }
}
