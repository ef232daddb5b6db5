use shared::{
    domain::{ConversationId, CorrelationId, UserId, UserProfile},
    protocol::{ChatInfo, HistoryMessage, InboundMessage, SidebarEntry},
};

/// Where a displayed message stands relative to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOrigin {
    LocalPending,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub sender_name: String,
    pub avatar: String,
    pub content: String,
    /// Display only. Arrival order is authoritative.
    pub timestamp: String,
    pub origin: MessageOrigin,
    pub is_me: bool,
    pub correlation_id: Option<CorrelationId>,
}

impl Message {
    pub fn local_pending(
        conversation_id: ConversationId,
        user: &CurrentUser,
        content: String,
        timestamp: String,
        correlation_id: CorrelationId,
    ) -> Self {
        Self {
            conversation_id,
            sender_id: user.id.clone(),
            sender_name: user.name.clone(),
            avatar: user.avatar.clone(),
            content,
            timestamp,
            origin: MessageOrigin::LocalPending,
            is_me: true,
            correlation_id: Some(correlation_id),
        }
    }

    pub fn from_inbound(event: InboundMessage, current_user: &UserId) -> Self {
        let is_me = &event.sender_id == current_user;
        Self {
            conversation_id: event.chat_id,
            sender_id: event.sender_id,
            sender_name: event.sender_name,
            avatar: event.avatar,
            content: event.content,
            timestamp: event.timestamp,
            origin: MessageOrigin::Confirmed,
            is_me,
            correlation_id: event.client_msg_id,
        }
    }

    pub fn from_history(conversation_id: ConversationId, message: HistoryMessage) -> Self {
        Self {
            conversation_id,
            sender_id: message.sender_id,
            sender_name: message.sender_name,
            avatar: message.avatar,
            content: message.content,
            timestamp: message.timestamp,
            origin: MessageOrigin::Confirmed,
            is_me: message.is_me,
            correlation_id: message.client_msg_id,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.origin == MessageOrigin::LocalPending
    }

    pub fn is_failed(&self) -> bool {
        self.origin == MessageOrigin::Failed
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: UserId,
    pub name: String,
    pub avatar: String,
}

impl From<UserProfile> for CurrentUser {
    fn from(profile: UserProfile) -> Self {
        Self {
            id: profile.id,
            name: profile.name,
            avatar: profile.avatar,
        }
    }
}

/// Owned copy of the foreground conversation handed to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSnapshot {
    pub conversation_id: ConversationId,
    pub info: Option<ChatInfo>,
    pub messages: Vec<Message>,
    pub loading: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidebarSnapshot {
    pub entries: Vec<SidebarEntry>,
}
