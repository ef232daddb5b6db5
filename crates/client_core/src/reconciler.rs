//! Merges locally-originated messages with their server echoes so every send
//! shows up in the foreground view exactly once, in arrival order.
//!
//! Two policies are supported:
//!
//! * [`ReconcilePolicy::OptimisticLocal`] appends a `LocalPending` entry at send
//!   time. A self-echo with a matching correlation id confirms that entry in
//!   place. A self-echo without one is suppressed and confirms the oldest pending
//!   entry.
//! * [`ReconcilePolicy::EchoOnly`] never appends at send time. Every echo for the
//!   active room is appended as confirmed.
//!
//! Correlation ids already represented in the view are remembered, so a
//! redelivered echo is dropped under either policy.

use std::{collections::HashSet, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use shared::{
    domain::{ConversationId, CorrelationId},
    protocol::{HistoryMessage, InboundMessage, OutboundMessage},
};
use tracing::debug;

use crate::{
    error::{SyncError, SyncResult},
    types::{CurrentUser, Message, MessageOrigin},
    view::ConversationView,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcilePolicy {
    #[default]
    OptimisticLocal,
    EchoOnly,
}

impl FromStr for ReconcilePolicy {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "optimistic" | "optimistic_local" => Ok(Self::OptimisticLocal),
            "echo" | "echo_only" => Ok(Self::EchoOnly),
            other => Err(SyncError::Settings(format!(
                "unknown reconcile policy '{other}'; expected optimistic or echo_only"
            ))),
        }
    }
}

impl fmt::Display for ReconcilePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OptimisticLocal => f.write_str("optimistic"),
            Self::EchoOnly => f.write_str("echo_only"),
        }
    }
}

/// What an inbound message did to the foreground view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    Appended,
    Confirmed,
    SuppressedEcho,
    Duplicate,
    Background,
}

#[derive(Debug, Default)]
pub struct Reconciler {
    policy: ReconcilePolicy,
    settled: HashSet<CorrelationId>,
}

impl Reconciler {
    pub fn new(policy: ReconcilePolicy) -> Self {
        Self {
            policy,
            settled: HashSet::new(),
        }
    }

    pub fn policy(&self) -> ReconcilePolicy {
        self.policy
    }

    /// Forgets per-conversation bookkeeping. Called when the active conversation changes.
    pub fn reset(&mut self) {
        self.settled.clear();
    }

    pub fn settle(&mut self, ids: impl IntoIterator<Item = CorrelationId>) {
        self.settled.extend(ids);
    }

    /// Builds the outbound message for a local send. Under the optimistic policy
    /// the pending entry is appended before anything is published.
    pub fn compose(
        &mut self,
        user: &CurrentUser,
        view: &mut ConversationView,
        content: &str,
        timestamp: String,
    ) -> SyncResult<OutboundMessage> {
        let content = content.trim();
        if content.is_empty() {
            return Err(SyncError::EmptyMessage);
        }
        let conversation_id = view
            .active()
            .cloned()
            .ok_or(SyncError::NoActiveConversation)?;

        let correlation_id = CorrelationId::generate();
        if self.policy == ReconcilePolicy::OptimisticLocal {
            view.append(Message::local_pending(
                conversation_id.clone(),
                user,
                content.to_string(),
                timestamp,
                correlation_id.clone(),
            ));
        }

        Ok(OutboundMessage {
            chat_id: conversation_id,
            content: content.to_string(),
            sender_id: user.id.clone(),
            client_msg_id: Some(correlation_id),
        })
    }

    pub fn reconcile(
        &mut self,
        user: &CurrentUser,
        view: &mut ConversationView,
        event: InboundMessage,
    ) -> Reconciled {
        if !view.is_active(&event.chat_id) {
            return Reconciled::Background;
        }
        let from_self = event.sender_id == user.id;

        if let Some(correlation_id) = &event.client_msg_id {
            if self.settled.contains(correlation_id) {
                debug!(%correlation_id, "reconcile: dropping redelivered message");
                return Reconciled::Duplicate;
            }
            if from_self {
                if let Some(local) = view.find_local_mut(correlation_id) {
                    local.origin = MessageOrigin::Confirmed;
                    local.timestamp = event.timestamp;
                    self.settled.insert(correlation_id.clone());
                    return Reconciled::Confirmed;
                }
            }
        } else if from_self && self.policy == ReconcilePolicy::OptimisticLocal {
            let oldest = view
                .messages()
                .iter()
                .find(|message| message.is_me && message.is_pending())
                .and_then(|message| message.correlation_id.clone());
            if let Some(oldest) = oldest {
                if let Some(local) = view.find_local_mut(&oldest) {
                    local.origin = MessageOrigin::Confirmed;
                }
                self.settled.insert(oldest);
            }
            return Reconciled::SuppressedEcho;
        }

        if let Some(correlation_id) = &event.client_msg_id {
            self.settled.insert(correlation_id.clone());
        }
        view.append(Message::from_inbound(event, &user.id));
        Reconciled::Appended
    }

    /// Applies the enriched message returned by the non-realtime send endpoint.
    pub fn confirm_via_fallback(
        &mut self,
        view: &mut ConversationView,
        conversation_id: &ConversationId,
        correlation_id: &CorrelationId,
        message: HistoryMessage,
    ) -> Reconciled {
        if !view.is_active(conversation_id) {
            return Reconciled::Background;
        }
        if self.settled.contains(correlation_id) {
            return Reconciled::Duplicate;
        }
        self.settled.insert(correlation_id.clone());

        if let Some(local) = view.find_local_mut(correlation_id) {
            local.origin = MessageOrigin::Confirmed;
            local.timestamp = message.timestamp;
            return Reconciled::Confirmed;
        }

        let mut confirmed = Message::from_history(conversation_id.clone(), message);
        confirmed.correlation_id = Some(correlation_id.clone());
        view.append(confirmed);
        Reconciled::Appended
    }

    /// Marks a send that did not reach the server. Under the echo-only policy
    /// nothing was shown yet, so a failed entry is appended for the user to act on.
    ///
    /// Returns false when the message belongs to a conversation no longer shown.
    pub fn mark_failed(
        &mut self,
        user: &CurrentUser,
        view: &mut ConversationView,
        outbound: &OutboundMessage,
        timestamp: String,
    ) -> bool {
        if !view.is_active(&outbound.chat_id) {
            return false;
        }
        let Some(correlation_id) = outbound.client_msg_id.clone() else {
            return false;
        };
        if self.settled.contains(&correlation_id) {
            return false;
        }

        match view.find_local_mut(&correlation_id) {
            Some(local) => local.origin = MessageOrigin::Failed,
            None => {
                let mut failed = Message::local_pending(
                    outbound.chat_id.clone(),
                    user,
                    outbound.content.clone(),
                    timestamp,
                    correlation_id,
                );
                failed.origin = MessageOrigin::Failed;
                view.append(failed);
            }
        }
        true
    }

    /// Puts a failed entry back to pending, in place, and rebuilds its outbound message.
    pub fn retry(
        &mut self,
        user: &CurrentUser,
        view: &mut ConversationView,
        correlation_id: &CorrelationId,
    ) -> SyncResult<OutboundMessage> {
        let local = view
            .find_local_mut(correlation_id)
            .ok_or_else(|| SyncError::UnknownMessage(correlation_id.clone()))?;
        if !local.is_failed() {
            return Err(SyncError::NotRetryable(correlation_id.clone()));
        }
        local.origin = MessageOrigin::LocalPending;

        Ok(OutboundMessage {
            chat_id: local.conversation_id.clone(),
            content: local.content.clone(),
            sender_id: user.id.clone(),
            client_msg_id: Some(correlation_id.clone()),
        })
    }

    pub fn discard(
        &mut self,
        view: &mut ConversationView,
        correlation_id: &CorrelationId,
    ) -> SyncResult<Message> {
        let local = view
            .find_local(correlation_id)
            .ok_or_else(|| SyncError::UnknownMessage(correlation_id.clone()))?;
        if !local.is_failed() {
            return Err(SyncError::NotRetryable(correlation_id.clone()));
        }
        view.remove_local(correlation_id)
            .ok_or_else(|| SyncError::UnknownMessage(correlation_id.clone()))
    }
}

/// Display timestamp for messages the server has not stamped yet.
pub fn local_timestamp() -> String {
    chrono::Local::now().format("%I:%M %p").to_string()
}

#[cfg(test)]
#[path = "tests/reconciler_tests.rs"]
mod tests;
