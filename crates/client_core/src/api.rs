//! Request/response collaborators: initial fetch, history loads, the
//! non-realtime send endpoint and the administrative flows.

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{ConversationId, UserProfile},
    error::{ApiException, ErrorBody, ErrorCode},
    protocol::{
        ChatHistoryResponse, CreateGroupRequest, CreateGroupResponse, HistoryMessage,
        InitResponse, ProfileUpdateRequest, ProfileUpdateResponse, SendMessageRequest,
        SendMessageResponse,
    },
};
use tracing::debug;

use crate::error::SyncResult;

#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn init(&self) -> SyncResult<InitResponse>;
    async fn load_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> SyncResult<ChatHistoryResponse>;
    /// Stores a message without the realtime channel and returns it as the server recorded it.
    async fn post_message(
        &self,
        conversation_id: &ConversationId,
        content: &str,
    ) -> SyncResult<HistoryMessage>;
    async fn update_profile(&self, update: ProfileUpdateRequest) -> SyncResult<UserProfile>;
    async fn list_users(&self) -> SyncResult<Vec<UserProfile>>;
    async fn create_group(&self, request: CreateGroupRequest) -> SyncResult<ConversationId>;
}

pub struct HttpChatApi {
    http: Client,
    server_url: String,
}

impl HttpChatApi {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), server_url)
    }

    /// Reuses `http`, e.g. one carrying the session cookie the server expects.
    pub fn with_client(http: Client, server_url: impl Into<String>) -> Self {
        let server_url = server_url.into();
        Self {
            http,
            server_url: server_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.server_url)
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn init(&self) -> SyncResult<InitResponse> {
        let response = self.http.get(self.url("/api/init")).send().await?;
        decode(response).await
    }

    async fn load_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> SyncResult<ChatHistoryResponse> {
        debug!(conversation_id = %conversation_id, "api: loading conversation");
        let response = self
            .http
            .get(self.url(&format!("/api/chat/{conversation_id}")))
            .send()
            .await?;
        decode(response).await
    }

    async fn post_message(
        &self,
        conversation_id: &ConversationId,
        content: &str,
    ) -> SyncResult<HistoryMessage> {
        let response = self
            .http
            .post(self.url(&format!("/api/chat/{conversation_id}")))
            .json(&SendMessageRequest {
                content: content.to_string(),
            })
            .send()
            .await?;
        let body: SendMessageResponse = decode(response).await?;
        if !body.is_success() {
            return Err(ApiException::new(
                ErrorCode::Internal,
                format!("send was not accepted: status '{}'", body.status),
            )
            .into());
        }
        body.message.ok_or_else(|| {
            ApiException::new(ErrorCode::Internal, "send response did not include the message")
                .into()
        })
    }

    async fn update_profile(&self, update: ProfileUpdateRequest) -> SyncResult<UserProfile> {
        let response = self
            .http
            .post(self.url("/api/profile/update"))
            .json(&update)
            .send()
            .await?;
        let body: ProfileUpdateResponse = decode(response).await?;
        Ok(body.user)
    }

    async fn list_users(&self) -> SyncResult<Vec<UserProfile>> {
        let response = self.http.get(self.url("/api/users")).send().await?;
        decode(response).await
    }

    async fn create_group(&self, request: CreateGroupRequest) -> SyncResult<ConversationId> {
        let response = self
            .http
            .post(self.url("/api/group/create"))
            .json(&request)
            .send()
            .await?;
        let body: CreateGroupResponse = decode(response).await?;
        Ok(body.chat_id)
    }
}

/// Non-2xx responses become [`ApiException`]s built from the `{error}` body when there is one.
async fn decode<T: DeserializeOwned>(response: Response) -> SyncResult<T> {
    let status = response.status();
    if status.is_success() {
        let bytes = response.bytes().await?;
        return Ok(serde_json::from_slice(&bytes)?);
    }

    let body = response
        .bytes()
        .await
        .ok()
        .and_then(|bytes| serde_json::from_slice::<ErrorBody>(&bytes).ok());
    Err(ApiException::from_status(status.as_u16(), body).into())
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
