use serde::{Deserialize, Serialize};

use crate::{
    domain::{ConversationId, ConversationKind, CorrelationId, UserId, UserProfile},
    error::ApiError,
};

/// `GET /api/init`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitResponse {
    pub user: UserProfile,
    #[serde(default)]
    pub sidebar: Vec<SidebarEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidebarEntry {
    pub chat_id: ConversationId,
    #[serde(rename = "type")]
    pub kind: ConversationKind,
    pub name: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub unread: u32,
    #[serde(default)]
    pub last_message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatInfo {
    pub id: ConversationId,
    #[serde(rename = "type")]
    pub kind: ConversationKind,
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub avatar: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub sender_id: UserId,
    pub sender_name: String,
    #[serde(default)]
    pub avatar: String,
    pub content: String,
    pub timestamp: String,
    #[serde(default)]
    pub is_me: bool,
    /// Present when the server stored the correlation id of the send.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_msg_id: Option<CorrelationId>,
}

/// `GET /api/chat/{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatHistoryResponse {
    pub chat_info: ChatInfo,
    #[serde(default)]
    pub messages: Vec<HistoryMessage>,
}

/// `POST /api/chat/{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<HistoryMessage>,
}

impl SendMessageResponse {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

/// `POST /api/profile/update`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileUpdateRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileUpdateResponse {
    pub status: String,
    pub user: UserProfile,
}

/// `POST /api/group/create`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    pub participants: Vec<UserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateGroupResponse {
    pub status: String,
    pub chat_id: ConversationId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub chat_id: ConversationId,
    pub content: String,
    pub sender_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_msg_id: Option<CorrelationId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub chat_id: ConversationId,
    pub sender_id: UserId,
    pub sender_name: String,
    #[serde(default)]
    pub avatar: String,
    pub content: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_msg_id: Option<CorrelationId>,
}

/// Events the client publishes on the realtime channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientRequest {
    Join { room: ConversationId },
    Leave { room: ConversationId },
    SendMessage(OutboundMessage),
}

/// Events the server pushes on the realtime channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    ReceiveMessage(InboundMessage),
    Joined { room: ConversationId },
    Error(ApiError),
}
