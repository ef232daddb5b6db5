//! Realtime channel: one long-lived connection to the server-pushed event
//! stream with room-scoped join/leave and fire-and-forget publish.
//!
//! Delivery is message passing. Callers [`ChannelClient::subscribe`] and drain
//! [`ChannelEvent`]s in their own loop instead of registering callbacks.
//! Reconnection is owned by the implementation. Consumers only observe
//! `Disconnected` and `Reconnected`.

#[cfg(test)]
mod loopback;
mod ws;

#[cfg(test)]
pub use loopback::LoopbackChannel;
pub use ws::{ReconnectPolicy, WsChannelClient};

use async_trait::async_trait;
use shared::{
    domain::{ConversationId, UserId},
    protocol::{ClientRequest, ServerEvent},
};
use tokio::sync::broadcast;
use tracing::warn;
use url::Url;

use crate::error::{SyncError, SyncResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Connected,
    Reconnected,
    Disconnected { reason: String },
    Server(ServerEvent),
}

#[async_trait]
pub trait ChannelClient: Send + Sync {
    /// Establishes the connection. Calling it again while connected is a no-op.
    async fn connect(&self) -> SyncResult<()>;

    fn state(&self) -> ConnectionState;

    /// Queues `request` for delivery. Never waits for acknowledgement.
    fn publish(&self, request: ClientRequest) -> SyncResult<()>;

    fn join(&self, room: &ConversationId) -> SyncResult<()> {
        self.publish(ClientRequest::Join { room: room.clone() })
    }

    fn leave(&self, room: &ConversationId) -> SyncResult<()> {
        self.publish(ClientRequest::Leave { room: room.clone() })
    }

    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent>;

    async fn close(&self) -> SyncResult<()>;
}

/// Parses one text frame. Malformed frames are logged and dropped.
pub fn decode_frame(text: &str) -> Option<ServerEvent> {
    match serde_json::from_str::<ServerEvent>(text) {
        Ok(event) => Some(event),
        Err(err) => {
            warn!("channel: dropping malformed frame: {err}");
            None
        }
    }
}

pub fn encode_request(request: &ClientRequest) -> SyncResult<String> {
    Ok(serde_json::to_string(request)?)
}

/// Derives the event-stream endpoint from the REST base url.
pub fn websocket_url(server_url: &str, user_id: Option<&UserId>) -> SyncResult<Url> {
    let ws_base = if let Some(rest) = server_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = server_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        return Err(SyncError::Settings(
            "server_url must start with http:// or https://".to_string(),
        ));
    };

    let mut url = Url::parse(&format!("{}/ws", ws_base.trim_end_matches('/')))
        .map_err(|err| SyncError::Settings(format!("invalid server_url '{server_url}': {err}")))?;
    if let Some(user_id) = user_id {
        url.query_pairs_mut().append_pair("user_id", user_id.as_str());
    }
    Ok(url)
}

#[cfg(test)]
#[path = "../tests/channel_tests.rs"]
mod tests;
