//! The session context for one signed-in user: who they are, which
//! conversation is in the foreground, the sidebar, the draft and whether the
//! view may have missed events while the channel was down.
//!
//! `ChatSession` never performs I/O. Each operation mutates local state and
//! returns the [`Effect`]s the caller must carry out, in order.

use std::collections::HashSet;

use shared::{
    domain::{ConversationId, CorrelationId, UserProfile},
    protocol::{
        ChatHistoryResponse, ClientRequest, HistoryMessage, InboundMessage, InitResponse,
        OutboundMessage, ServerEvent,
    },
};
use tracing::{debug, info, warn};

use crate::{
    channel::{ChannelEvent, ConnectionState},
    config::ClientSettings,
    error::{SyncError, SyncResult},
    membership::RoomMembershipTracker,
    reconciler::{local_timestamp, ReconcilePolicy, Reconciled, Reconciler},
    sidebar::Sidebar,
    types::{ConversationSnapshot, CurrentUser, MessageOrigin, SidebarSnapshot},
    view::{ConversationView, LoadOutcome, LoadTicket},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Fire-and-forget publish on the realtime channel.
    Publish(ClientRequest),
    /// Fetch the conversation named by the ticket and hand it to [`ChatSession::complete_load`].
    Load(LoadTicket),
    /// Store the message through the REST endpoint and report back with
    /// [`ChatSession::complete_fallback`].
    PostFallback(OutboundMessage),
    /// Re-fetch `/api/init` and hand it to [`ChatSession::refresh_sidebar`].
    RefreshSidebar,
    /// Something the user should see that is not part of a snapshot.
    Notify(String),
}

#[derive(Debug)]
pub struct ChatSession {
    user: Option<CurrentUser>,
    membership: RoomMembershipTracker,
    view: ConversationView,
    sidebar: Sidebar,
    reconciler: Reconciler,
    draft: String,
    connection: ConnectionState,
    desynchronized: bool,
    stranded: HashSet<CorrelationId>,
}

impl ChatSession {
    pub fn new(settings: &ClientSettings) -> Self {
        Self {
            user: None,
            membership: RoomMembershipTracker::new(
                settings.confirm_joins_optimistically,
                settings.track_leaves,
            ),
            view: ConversationView::new(),
            sidebar: Sidebar::new(),
            reconciler: Reconciler::new(settings.policy),
            draft: String::new(),
            connection: ConnectionState::Disconnected,
            desynchronized: false,
            stranded: HashSet::new(),
        }
    }

    pub fn user(&self) -> Option<&CurrentUser> {
        self.user.as_ref()
    }

    pub fn view(&self) -> &ConversationView {
        &self.view
    }

    pub fn sidebar(&self) -> &Sidebar {
        &self.sidebar
    }

    pub fn membership(&self) -> &RoomMembershipTracker {
        &self.membership
    }

    pub fn policy(&self) -> ReconcilePolicy {
        self.reconciler.policy()
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn is_desynchronized(&self) -> bool {
        self.desynchronized
    }

    pub fn conversation_snapshot(&self) -> Option<ConversationSnapshot> {
        self.view.snapshot()
    }

    pub fn sidebar_snapshot(&self) -> SidebarSnapshot {
        self.sidebar.snapshot()
    }

    /// Installs the current user and the sidebar from the startup fetch.
    pub fn initialize(&mut self, init: InitResponse) -> CurrentUser {
        let user = CurrentUser::from(init.user);
        info!(user_id = %user.id, entries = init.sidebar.len(), "sync: session initialized");
        self.user = Some(user.clone());
        self.sidebar.replace(init.sidebar);
        user
    }

    pub fn refresh_sidebar(&mut self, init: InitResponse) {
        self.apply_profile(init.user);
        self.sidebar.replace(init.sidebar);
        if let Some(active) = self.view.active().cloned() {
            self.sidebar.mark_read(&active);
        }
    }

    pub fn apply_profile(&mut self, profile: UserProfile) {
        match &mut self.user {
            Some(user) if user.id == profile.id => {
                user.name = profile.name;
                user.avatar = profile.avatar;
            }
            Some(user) => warn!(
                user_id = %user.id,
                profile_id = %profile.id,
                "sync: ignoring profile for a different user"
            ),
            None => debug!("sync: ignoring profile before initialization"),
        }
    }

    pub fn switch_to(&mut self, conversation_id: ConversationId) -> SyncResult<Vec<Effect>> {
        self.require_user()?;
        if self.view.is_active(&conversation_id) {
            return Ok(Vec::new());
        }

        let mut effects: Vec<Effect> = self
            .membership
            .switch_to(conversation_id.clone())
            .into_iter()
            .map(Effect::Publish)
            .collect();
        self.reconciler.reset();
        self.stranded.clear();
        self.sidebar.mark_read(&conversation_id);
        info!(conversation_id = %conversation_id, "sync: switching conversation");
        effects.push(Effect::Load(self.view.switch_to(conversation_id)));
        Ok(effects)
    }

    pub fn complete_load(&mut self, ticket: &LoadTicket, response: ChatHistoryResponse) -> bool {
        let LoadOutcome::Applied { settled } = self.view.complete_load(ticket, response) else {
            return false;
        };
        self.reconciler.settle(settled);

        for correlation_id in std::mem::take(&mut self.stranded) {
            if let Some(local) = self.view.find_local_mut(&correlation_id) {
                if local.is_pending() {
                    local.origin = MessageOrigin::Failed;
                    warn!(
                        correlation_id = %correlation_id,
                        "sync: send was lost with the connection"
                    );
                }
            }
        }
        true
    }

    /// Clears the loading state after a failed fetch. Returns false for stale tickets.
    pub fn fail_load(&mut self, ticket: &LoadTicket) -> bool {
        self.view.abandon_load(ticket)
    }

    pub fn set_draft(&mut self, draft: impl Into<String>) {
        self.draft = draft.into();
    }

    /// Sends the draft. The draft is cleared on success and kept when the send is rejected.
    pub fn send_draft(&mut self) -> SyncResult<Vec<Effect>> {
        let draft = std::mem::take(&mut self.draft);
        let result = self.send(&draft);
        if result.is_err() {
            self.draft = draft;
        }
        result
    }

    pub fn send(&mut self, content: &str) -> SyncResult<Vec<Effect>> {
        let Some(user) = self.user.as_ref() else {
            return Err(SyncError::NotInitialized);
        };
        let outbound = self
            .reconciler
            .compose(user, &mut self.view, content, local_timestamp())?;
        if self.reconciler.policy() == ReconcilePolicy::OptimisticLocal {
            self.sidebar.touch(&outbound.chat_id, &outbound.content, false);
        }
        debug!(
            conversation_id = %outbound.chat_id,
            correlation_id = ?outbound.client_msg_id,
            "sync: sending message"
        );
        Ok(vec![self.deliver(outbound)])
    }

    /// A publish the channel refused. Sends go to the REST endpoint instead.
    pub fn publish_failed(&mut self, request: ClientRequest) -> Vec<Effect> {
        match request {
            ClientRequest::SendMessage(outbound) => vec![Effect::PostFallback(outbound)],
            other => {
                debug!(request = ?other, "sync: publish dropped while channel is down");
                Vec::new()
            }
        }
    }

    /// Applies the outcome of a REST send. Returns false when the send failed.
    pub fn complete_fallback(
        &mut self,
        outbound: &OutboundMessage,
        result: SyncResult<HistoryMessage>,
    ) -> bool {
        let Some(user) = self.user.as_ref() else {
            return false;
        };
        let Some(correlation_id) = outbound.client_msg_id.as_ref() else {
            return result.is_ok();
        };

        match result {
            Ok(stored) => {
                if self.reconciler.policy() == ReconcilePolicy::EchoOnly {
                    self.sidebar.touch(&outbound.chat_id, &stored.content, false);
                }
                self.reconciler.confirm_via_fallback(
                    &mut self.view,
                    &outbound.chat_id,
                    correlation_id,
                    stored,
                );
                true
            }
            Err(err) => {
                warn!(
                    conversation_id = %outbound.chat_id,
                    correlation_id = %correlation_id,
                    "sync: send failed: {err}"
                );
                self.reconciler
                    .mark_failed(user, &mut self.view, outbound, local_timestamp());
                false
            }
        }
    }

    pub fn retry(&mut self, correlation_id: &CorrelationId) -> SyncResult<Vec<Effect>> {
        let Some(user) = self.user.as_ref() else {
            return Err(SyncError::NotInitialized);
        };
        let outbound = self.reconciler.retry(user, &mut self.view, correlation_id)?;
        self.stranded.remove(correlation_id);
        info!(correlation_id = %correlation_id, "sync: retrying send");
        Ok(vec![self.deliver(outbound)])
    }

    pub fn discard(&mut self, correlation_id: &CorrelationId) -> SyncResult<()> {
        self.reconciler.discard(&mut self.view, correlation_id)?;
        self.stranded.remove(correlation_id);
        Ok(())
    }

    pub fn handle_channel_event(&mut self, event: ChannelEvent) -> Vec<Effect> {
        match event {
            ChannelEvent::Connected | ChannelEvent::Reconnected => {
                self.connection = ConnectionState::Connected;
                let mut effects: Vec<Effect> =
                    self.membership.rejoin().into_iter().map(Effect::Publish).collect();
                if self.desynchronized {
                    self.desynchronized = false;
                    effects.extend(self.resynchronize());
                }
                effects
            }
            ChannelEvent::Disconnected { reason } => {
                self.connection = ConnectionState::Disconnected;
                self.desynchronized = true;
                self.stranded.extend(
                    self.view
                        .messages()
                        .iter()
                        .filter(|message| message.is_pending())
                        .filter_map(|message| message.correlation_id.clone()),
                );
                warn!(%reason, stranded = self.stranded.len(), "sync: channel disconnected");
                Vec::new()
            }
            ChannelEvent::Server(event) => self.handle_server_event(event),
        }
    }

    pub fn handle_server_event(&mut self, event: ServerEvent) -> Vec<Effect> {
        match event {
            ServerEvent::ReceiveMessage(message) => {
                self.receive(message);
                Vec::new()
            }
            ServerEvent::Joined { room } => {
                if self.membership.confirm(&room) {
                    debug!(room = %room, "sync: join confirmed");
                }
                Vec::new()
            }
            ServerEvent::Error(error) => {
                warn!(code = ?error.code, "sync: server reported error: {}", error.message);
                vec![Effect::Notify(error.message)]
            }
        }
    }

    /// Reloads the active conversation, e.g. after events may have been missed.
    pub fn resynchronize(&mut self) -> Vec<Effect> {
        match self.view.begin_reload() {
            Some(ticket) => {
                info!(conversation_id = %ticket.conversation_id, "sync: reloading conversation");
                vec![Effect::Load(ticket)]
            }
            None => Vec::new(),
        }
    }

    fn receive(&mut self, message: InboundMessage) {
        let Some(user) = self.user.as_ref() else {
            debug!(conversation_id = %message.chat_id, "sync: dropping message before initialization");
            return;
        };
        if self.membership.confirm(&message.chat_id) {
            debug!(room = %message.chat_id, "sync: join confirmed by delivery");
        }

        let conversation_id = message.chat_id.clone();
        let preview = message.content.clone();
        let count_unread = message.sender_id != user.id && !self.view.is_active(&conversation_id);

        let outcome = self.reconciler.reconcile(user, &mut self.view, message);
        debug!(conversation_id = %conversation_id, ?outcome, "sync: message reconciled");
        if outcome != Reconciled::Duplicate {
            self.sidebar.touch(&conversation_id, &preview, count_unread);
        }
    }

    fn deliver(&self, outbound: OutboundMessage) -> Effect {
        if self.connection == ConnectionState::Connected {
            Effect::Publish(ClientRequest::SendMessage(outbound))
        } else {
            Effect::PostFallback(outbound)
        }
    }

    fn require_user(&self) -> SyncResult<&CurrentUser> {
        self.user.as_ref().ok_or(SyncError::NotInitialized)
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
