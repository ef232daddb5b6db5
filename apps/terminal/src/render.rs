use client_core::{
    ClientEvent, ConnectionState, ConversationSnapshot, Message, MessageOrigin, SidebarSnapshot,
};
use shared::domain::UserProfile;

pub fn event(event: &ClientEvent) -> String {
    match event {
        ClientEvent::ConversationUpdated(snapshot) => conversation(snapshot),
        ClientEvent::SidebarUpdated(snapshot) => sidebar(snapshot),
        ClientEvent::ConnectionChanged(state) => match state {
            ConnectionState::Connected => "* connected".to_string(),
            ConnectionState::Connecting => "* connecting".to_string(),
            ConnectionState::Disconnected => {
                "* disconnected; messages go over HTTP until the channel is back".to_string()
            }
        },
        ClientEvent::ProfileUpdated(user) => format!("* you are now {}", user.name),
        ClientEvent::Error(message) => format!("! {message}"),
    }
}

pub fn conversation(snapshot: &ConversationSnapshot) -> String {
    let title = snapshot
        .info
        .as_ref()
        .map(|info| match info.status.as_str() {
            "" => info.name.clone(),
            status => format!("{} ({status})", info.name),
        })
        .unwrap_or_else(|| snapshot.conversation_id.to_string());

    let mut out = format!("== {title} ==");
    if snapshot.loading {
        out.push_str("\n   loading...");
    }
    for (index, message) in snapshot.messages.iter().enumerate() {
        out.push('\n');
        out.push_str(&line(index + 1, message));
    }
    out
}

fn line(position: usize, message: &Message) -> String {
    let sender = if message.is_me { "you" } else { &message.sender_name };
    let marker = match message.origin {
        MessageOrigin::Confirmed => String::new(),
        MessageOrigin::LocalPending => " (sending)".to_string(),
        MessageOrigin::Failed => format!(" (failed: /retry {position} or /discard {position})"),
    };
    format!(
        "{position:>3} [{}] {sender}: {}{marker}",
        message.timestamp, message.content
    )
}

pub fn sidebar(snapshot: &SidebarSnapshot) -> String {
    let mut out = String::from("-- conversations --");
    for entry in &snapshot.entries {
        let unread = if entry.unread > 0 {
            format!(" [{}]", entry.unread)
        } else {
            String::new()
        };
        out.push_str(&format!(
            "\n  {:<12} {}{unread}  {}",
            entry.chat_id, entry.name, entry.last_message
        ));
    }
    out
}

pub fn users(users: &[UserProfile]) -> String {
    users
        .iter()
        .map(|user| format!("  {:<6} {} ({:?})", user.id, user.name, user.status))
        .collect::<Vec<_>>()
        .join("\n")
}
