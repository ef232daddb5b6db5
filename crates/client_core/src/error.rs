use shared::{domain::CorrelationId, error::ApiException};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("current user is not loaded yet")]
    NotInitialized,
    #[error("no conversation is active")]
    NoActiveConversation,
    #[error("message content is empty")]
    EmptyMessage,
    #[error("no local message with correlation id {0}")]
    UnknownMessage(CorrelationId),
    #[error("message {0} has not failed; only failed messages can be retried")]
    NotRetryable(CorrelationId),
    #[error("realtime channel is closed")]
    ChannelClosed,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server rejected request: {0}")]
    Api(#[from] ApiException),
    #[error("failed to decode payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid settings: {0}")]
    Settings(String),
    #[error("client has shut down")]
    Stopped,
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
