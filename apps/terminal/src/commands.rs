use anyhow::{bail, Context, Result};
use shared::domain::{ConversationId, UserId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Open(ConversationId),
    Send(String),
    /// 1-based position in the conversation as printed.
    Retry(usize),
    Discard(usize),
    Users,
    Group {
        name: String,
        participants: Vec<UserId>,
    },
    Profile(String),
    Resync,
    Help,
    Quit,
}

pub const HELP: &str = "\
/open <chat_id>          switch conversation
/retry <n>               resend failed message n
/discard <n>             drop failed message n
/users                   list users
/group <name> <id,id>    create a group conversation
/profile <name>          change display name
/resync                  reload the open conversation
/quit                    exit
anything else is sent to the open conversation";

pub fn parse(line: &str) -> Result<Command> {
    let line = line.trim();
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Command::Send(line.to_string()));
    };

    let mut parts = rest.splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or_default();
    let args = parts.next().unwrap_or_default().trim();

    match name {
        "open" => Ok(Command::Open(ConversationId::new(required(args, "/open <chat_id>")?))),
        "retry" => Ok(Command::Retry(position(args, "/retry <n>")?)),
        "discard" => Ok(Command::Discard(position(args, "/discard <n>")?)),
        "users" => Ok(Command::Users),
        "group" => {
            let usage = "/group <name> <id,id>";
            let Some((name, ids)) = args.rsplit_once(char::is_whitespace) else {
                bail!("usage: {usage}");
            };
            let participants: Vec<UserId> = ids
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(UserId::from)
                .collect();
            if participants.is_empty() {
                bail!("usage: {usage}");
            }
            Ok(Command::Group {
                name: required(name, usage)?.to_string(),
                participants,
            })
        }
        "profile" => Ok(Command::Profile(required(args, "/profile <name>")?.to_string())),
        "resync" => Ok(Command::Resync),
        "help" => Ok(Command::Help),
        "quit" | "exit" => Ok(Command::Quit),
        other => bail!("unknown command /{other}; try /help"),
    }
}

fn required<'a>(value: &'a str, usage: &str) -> Result<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        bail!("usage: {usage}");
    }
    Ok(value)
}

fn position(value: &str, usage: &str) -> Result<usize> {
    let n: usize = required(value, usage)?
        .parse()
        .with_context(|| format!("usage: {usage}"))?;
    if n == 0 {
        bail!("messages are numbered from 1");
    }
    Ok(n)
}
