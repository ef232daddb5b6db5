pub mod api;
pub mod channel;
pub mod config;
pub mod error;
pub mod membership;
pub mod reconciler;
pub mod session;
pub mod sidebar;
pub mod types;
pub mod view;

use std::sync::Arc;

use async_trait::async_trait;
use shared::{
    domain::{ConversationId, CorrelationId, UserId, UserProfile},
    protocol::{
        ChatHistoryResponse, ClientRequest, CreateGroupRequest, HistoryMessage, InitResponse,
        OutboundMessage, ProfileUpdateRequest,
    },
};
use tokio::{
    sync::{broadcast, mpsc, oneshot, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

pub use api::{ChatApi, HttpChatApi};
pub use channel::{ChannelClient, ChannelEvent, ConnectionState, ReconnectPolicy, WsChannelClient};
pub use config::{load_settings, ClientSettings};
pub use error::{SyncError, SyncResult};
pub use reconciler::ReconcilePolicy;
pub use session::{ChatSession, Effect};
pub use types::{ConversationSnapshot, CurrentUser, Message, MessageOrigin, SidebarSnapshot};

use view::LoadTicket;

#[derive(Debug, Clone)]
pub enum ClientEvent {
    ConversationUpdated(ConversationSnapshot),
    SidebarUpdated(SidebarSnapshot),
    ConnectionChanged(ConnectionState),
    ProfileUpdated(CurrentUser),
    Error(String),
}

#[async_trait]
pub trait ClientHandle: Send + Sync {
    fn current_user(&self) -> &CurrentUser;
    async fn open_conversation(&self, conversation_id: ConversationId) -> SyncResult<()>;
    async fn send_message(&self, content: &str) -> SyncResult<()>;
    async fn set_draft(&self, draft: &str) -> SyncResult<()>;
    async fn send_draft(&self) -> SyncResult<()>;
    async fn retry(&self, correlation_id: CorrelationId) -> SyncResult<()>;
    async fn discard(&self, correlation_id: CorrelationId) -> SyncResult<()>;
    async fn resynchronize(&self) -> SyncResult<()>;
    async fn conversation(&self) -> SyncResult<Option<ConversationSnapshot>>;
    async fn sidebar(&self) -> SyncResult<SidebarSnapshot>;
    async fn list_users(&self) -> SyncResult<Vec<UserProfile>>;
    async fn update_profile(&self, update: ProfileUpdateRequest) -> SyncResult<CurrentUser>;
    async fn create_group(
        &self,
        name: &str,
        participants: Vec<UserId>,
    ) -> SyncResult<ConversationId>;
    async fn shutdown(&self);
    fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent>;
}

type Reply<T> = oneshot::Sender<SyncResult<T>>;

enum ClientCommand {
    Open {
        conversation_id: ConversationId,
        reply: Reply<()>,
    },
    Send {
        content: String,
        reply: Reply<()>,
    },
    SetDraft(String),
    SendDraft {
        reply: Reply<()>,
    },
    Retry {
        correlation_id: CorrelationId,
        reply: Reply<()>,
    },
    Discard {
        correlation_id: CorrelationId,
        reply: Reply<()>,
    },
    Resync,
    ApplyProfile(UserProfile),
    RefreshSidebar,
    Conversation {
        reply: Reply<Option<ConversationSnapshot>>,
    },
    Sidebar {
        reply: Reply<SidebarSnapshot>,
    },
    Shutdown,
}

enum Completion {
    Loaded {
        ticket: LoadTicket,
        result: SyncResult<ChatHistoryResponse>,
    },
    Posted {
        outbound: OutboundMessage,
        result: SyncResult<HistoryMessage>,
    },
    SidebarFetched(SyncResult<InitResponse>),
}

/// Wires a [`ChatApi`] and a [`ChannelClient`] to a [`ChatSession`] running on its own task.
pub struct RealtimeClient {
    api: Arc<dyn ChatApi>,
    channel: Arc<dyn ChannelClient>,
    settings: ClientSettings,
}

impl RealtimeClient {
    pub fn new(
        api: Arc<dyn ChatApi>,
        channel: Arc<dyn ChannelClient>,
        settings: ClientSettings,
    ) -> Self {
        Self {
            api,
            channel,
            settings,
        }
    }

    /// Fetches the current user, then starts the session.
    pub async fn start(self) -> SyncResult<RealtimeHandle> {
        let init = self.api.init().await?;
        Ok(self.start_initialized(init).await)
    }

    /// Starts the session from an `/api/init` response the caller already holds.
    ///
    /// A channel that fails to connect is not fatal. Sends then go through the
    /// REST endpoint.
    pub async fn start_initialized(self, init: InitResponse) -> RealtimeHandle {
        let (events, _) = broadcast::channel(self.settings.event_buffer.max(1));
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (completions, completions_rx) = mpsc::unbounded_channel();
        let channel_events = self.channel.subscribe();

        let mut session = ChatSession::new(&self.settings);
        let user = session.initialize(init);
        let driver = Driver {
            last_conversation: None,
            last_sidebar: session.sidebar_snapshot(),
            last_connection: session.connection(),
            session,
            api: Arc::clone(&self.api),
            channel: Arc::clone(&self.channel),
            events: events.clone(),
            completions,
        };
        let task = tokio::spawn(driver.run(commands_rx, channel_events, completions_rx));

        if let Err(err) = self.channel.connect().await {
            warn!("sync: realtime channel unavailable, sends will use the REST endpoint: {err}");
        }

        RealtimeHandle {
            user,
            api: self.api,
            commands,
            events,
            task: Mutex::new(Some(task)),
        }
    }
}

/// Connects to the chat server at `settings.server_url` over HTTP and websocket.
pub async fn connect(settings: ClientSettings) -> SyncResult<RealtimeHandle> {
    let api = HttpChatApi::new(settings.server_url.clone());
    let init = api.init().await?;
    let endpoint = channel::websocket_url(&settings.server_url, Some(&init.user.id))?;
    let channel = WsChannelClient::new(endpoint, settings.reconnect_policy(), settings.event_buffer);
    info!(server_url = %settings.server_url, policy = %settings.policy, "sync: connecting");
    Ok(RealtimeClient::new(Arc::new(api), Arc::new(channel), settings)
        .start_initialized(init)
        .await)
}

pub struct RealtimeHandle {
    user: CurrentUser,
    api: Arc<dyn ChatApi>,
    commands: mpsc::UnboundedSender<ClientCommand>,
    events: broadcast::Sender<ClientEvent>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RealtimeHandle {
    fn post(&self, command: ClientCommand) -> SyncResult<()> {
        self.commands.send(command).map_err(|_| SyncError::Stopped)
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> ClientCommand) -> SyncResult<T> {
        let (reply, response) = oneshot::channel();
        self.post(command(reply))?;
        response.await.map_err(|_| SyncError::Stopped)?
    }
}

#[async_trait]
impl ClientHandle for RealtimeHandle {
    fn current_user(&self) -> &CurrentUser {
        &self.user
    }

    async fn open_conversation(&self, conversation_id: ConversationId) -> SyncResult<()> {
        self.request(|reply| ClientCommand::Open {
            conversation_id,
            reply,
        })
        .await
    }

    async fn send_message(&self, content: &str) -> SyncResult<()> {
        let content = content.to_string();
        self.request(|reply| ClientCommand::Send { content, reply })
            .await
    }

    async fn set_draft(&self, draft: &str) -> SyncResult<()> {
        self.post(ClientCommand::SetDraft(draft.to_string()))
    }

    async fn send_draft(&self) -> SyncResult<()> {
        self.request(|reply| ClientCommand::SendDraft { reply }).await
    }

    async fn retry(&self, correlation_id: CorrelationId) -> SyncResult<()> {
        self.request(|reply| ClientCommand::Retry {
            correlation_id,
            reply,
        })
        .await
    }

    async fn discard(&self, correlation_id: CorrelationId) -> SyncResult<()> {
        self.request(|reply| ClientCommand::Discard {
            correlation_id,
            reply,
        })
        .await
    }

    async fn resynchronize(&self) -> SyncResult<()> {
        self.post(ClientCommand::Resync)
    }

    async fn conversation(&self) -> SyncResult<Option<ConversationSnapshot>> {
        self.request(|reply| ClientCommand::Conversation { reply })
            .await
    }

    async fn sidebar(&self) -> SyncResult<SidebarSnapshot> {
        self.request(|reply| ClientCommand::Sidebar { reply }).await
    }

    async fn list_users(&self) -> SyncResult<Vec<UserProfile>> {
        self.api.list_users().await
    }

    async fn update_profile(&self, update: ProfileUpdateRequest) -> SyncResult<CurrentUser> {
        let profile = self.api.update_profile(update).await?;
        let user = CurrentUser::from(profile.clone());
        self.post(ClientCommand::ApplyProfile(profile))?;
        Ok(user)
    }

    async fn create_group(
        &self,
        name: &str,
        participants: Vec<UserId>,
    ) -> SyncResult<ConversationId> {
        let chat_id = self
            .api
            .create_group(CreateGroupRequest {
                name: name.to_string(),
                participants,
            })
            .await?;
        info!(conversation_id = %chat_id, "sync: group created");
        self.post(ClientCommand::RefreshSidebar)?;
        Ok(chat_id)
    }

    async fn shutdown(&self) {
        let _ = self.post(ClientCommand::Shutdown);
        if let Some(task) = self.task.lock().await.take() {
            if let Err(err) = task.await {
                warn!("sync: driver task ended abnormally: {err}");
            }
        }
    }

    fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }
}

/// Owns the session. Every input is applied to completion before the next is taken.
struct Driver {
    session: ChatSession,
    api: Arc<dyn ChatApi>,
    channel: Arc<dyn ChannelClient>,
    events: broadcast::Sender<ClientEvent>,
    completions: mpsc::UnboundedSender<Completion>,
    last_conversation: Option<ConversationSnapshot>,
    last_sidebar: SidebarSnapshot,
    last_connection: ConnectionState,
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<ClientCommand>,
        mut channel_events: broadcast::Receiver<ChannelEvent>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
    ) {
        let mut channel_open = true;
        loop {
            tokio::select! {
                biased;
                event = channel_events.recv(), if channel_open => match event {
                    Ok(event) => {
                        let effects = self.session.handle_channel_event(event);
                        self.execute(effects);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "sync: channel events lagged, reloading conversation");
                        let effects = self.session.resynchronize();
                        self.execute(effects);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("sync: channel event stream closed");
                        channel_open = false;
                    }
                },
                Some(completion) = completions.recv() => self.complete(completion),
                command = commands.recv() => match command {
                    Some(ClientCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
            }
            self.publish_changes();
        }

        if let Err(err) = self.channel.close().await {
            warn!("sync: failed to close channel: {err}");
        }
        debug!("sync: driver stopped");
    }

    fn handle_command(&mut self, command: ClientCommand) {
        match command {
            ClientCommand::Open {
                conversation_id,
                reply,
            } => {
                let result = self.session.switch_to(conversation_id);
                let _ = reply.send(self.dispatch(result));
            }
            ClientCommand::Send { content, reply } => {
                let result = self.session.send(&content);
                let _ = reply.send(self.dispatch(result));
            }
            ClientCommand::SetDraft(draft) => self.session.set_draft(draft),
            ClientCommand::SendDraft { reply } => {
                let result = self.session.send_draft();
                let _ = reply.send(self.dispatch(result));
            }
            ClientCommand::Retry {
                correlation_id,
                reply,
            } => {
                let result = self.session.retry(&correlation_id);
                let _ = reply.send(self.dispatch(result));
            }
            ClientCommand::Discard {
                correlation_id,
                reply,
            } => {
                let _ = reply.send(self.session.discard(&correlation_id));
            }
            ClientCommand::Resync => {
                let effects = self.session.resynchronize();
                self.execute(effects);
            }
            ClientCommand::ApplyProfile(profile) => {
                self.session.apply_profile(profile);
                if let Some(user) = self.session.user() {
                    let _ = self.events.send(ClientEvent::ProfileUpdated(user.clone()));
                }
            }
            ClientCommand::RefreshSidebar => self.execute(vec![Effect::RefreshSidebar]),
            ClientCommand::Conversation { reply } => {
                let _ = reply.send(Ok(self.session.conversation_snapshot()));
            }
            ClientCommand::Sidebar { reply } => {
                let _ = reply.send(Ok(self.session.sidebar_snapshot()));
            }
            ClientCommand::Shutdown => {}
        }
    }

    fn dispatch(&mut self, result: SyncResult<Vec<Effect>>) -> SyncResult<()> {
        result.map(|effects| self.execute(effects))
    }

    fn execute(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Publish(request) => {
                    let sent = match &request {
                        ClientRequest::Join { room } => self.channel.join(room),
                        ClientRequest::Leave { room } => self.channel.leave(room),
                        ClientRequest::SendMessage(_) => self.channel.publish(request.clone()),
                    };
                    if let Err(err) = sent {
                        debug!("sync: publish refused: {err}");
                        let fallback = self.session.publish_failed(request);
                        self.execute(fallback);
                    }
                }
                Effect::Load(ticket) => {
                    let api = Arc::clone(&self.api);
                    let completions = self.completions.clone();
                    tokio::spawn(async move {
                        let result = api.load_conversation(&ticket.conversation_id).await;
                        let _ = completions.send(Completion::Loaded { ticket, result });
                    });
                }
                Effect::PostFallback(outbound) => {
                    let api = Arc::clone(&self.api);
                    let completions = self.completions.clone();
                    tokio::spawn(async move {
                        let result = api.post_message(&outbound.chat_id, &outbound.content).await;
                        let _ = completions.send(Completion::Posted { outbound, result });
                    });
                }
                Effect::RefreshSidebar => {
                    let api = Arc::clone(&self.api);
                    let completions = self.completions.clone();
                    tokio::spawn(async move {
                        let result = api.init().await;
                        let _ = completions.send(Completion::SidebarFetched(result));
                    });
                }
                Effect::Notify(message) => {
                    let _ = self.events.send(ClientEvent::Error(message));
                }
            }
        }
    }

    fn complete(&mut self, completion: Completion) {
        match completion {
            Completion::Loaded { ticket, result } => match result {
                Ok(response) => {
                    if !self.session.complete_load(&ticket, response) {
                        debug!(
                            conversation_id = %ticket.conversation_id,
                            seq = ticket.seq(),
                            "sync: discarded stale load"
                        );
                    }
                }
                Err(err) => {
                    if self.session.fail_load(&ticket) {
                        warn!(conversation_id = %ticket.conversation_id, "sync: load failed: {err}");
                        let _ = self.events.send(ClientEvent::Error(format!(
                            "failed to load conversation {}: {err}",
                            ticket.conversation_id
                        )));
                    }
                }
            },
            Completion::Posted { outbound, result } => {
                let failure = result.as_ref().err().map(ToString::to_string);
                if !self.session.complete_fallback(&outbound, result) {
                    if let Some(failure) = failure {
                        let _ = self
                            .events
                            .send(ClientEvent::Error(format!("message not sent: {failure}")));
                    }
                }
            }
            Completion::SidebarFetched(result) => match result {
                Ok(init) => self.session.refresh_sidebar(init),
                Err(err) => {
                    let _ = self
                        .events
                        .send(ClientEvent::Error(format!("failed to refresh sidebar: {err}")));
                }
            },
        }
    }

    fn publish_changes(&mut self) {
        let connection = self.session.connection();
        if connection != self.last_connection {
            self.last_connection = connection;
            let _ = self.events.send(ClientEvent::ConnectionChanged(connection));
        }

        let sidebar = self.session.sidebar_snapshot();
        if sidebar != self.last_sidebar {
            self.last_sidebar = sidebar.clone();
            let _ = self.events.send(ClientEvent::SidebarUpdated(sidebar));
        }

        let conversation = self.session.conversation_snapshot();
        if conversation != self.last_conversation {
            self.last_conversation = conversation.clone();
            if let Some(snapshot) = conversation {
                let _ = self.events.send(ClientEvent::ConversationUpdated(snapshot));
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
