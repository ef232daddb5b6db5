mod commands;
mod render;

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use client_core::{
    config::load_settings_with, load_settings, ClientHandle, ReconcilePolicy, RealtimeHandle,
};
use shared::{
    domain::{ConversationId, CorrelationId},
    protocol::ProfileUpdateRequest,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use commands::Command;

#[derive(Parser, Debug)]
struct Args {
    /// Overrides `server_url` from settings, e.g. http://127.0.0.1:5000
    #[arg(long)]
    server_url: Option<String>,
    /// optimistic | echo_only
    #[arg(long)]
    policy: Option<ReconcilePolicy>,
    /// Settings file to read instead of ./client.toml
    #[arg(long)]
    config: Option<PathBuf>,
    /// Conversation to open once signed in.
    #[arg(long)]
    open: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => load_settings_with(path, |key| std::env::var(key).ok()),
        None => load_settings(),
    };
    if let Some(server_url) = args.server_url {
        settings.server_url = server_url;
    }
    if let Some(policy) = args.policy {
        settings.policy = policy;
    }

    let server_url = settings.server_url.clone();
    let handle = client_core::connect(settings)
        .await
        .with_context(|| format!("failed to sign in at {server_url}"))?;
    let user = handle.current_user();
    println!("Signed in as {} ({}). /help lists commands.", user.name, user.id);
    println!("{}", render::sidebar(&handle.sidebar().await?));

    let mut events = handle.subscribe_events();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => println!("{}", render::event(&event)),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "terminal: skipped events"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    if let Some(chat_id) = args.open {
        if let Err(err) = handle.open_conversation(ConversationId::new(chat_id)).await {
            eprintln!("! {err}");
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match commands::parse(&line) {
            Ok(Command::Quit) => break,
            Ok(command) => {
                if let Err(err) = run(&handle, command).await {
                    eprintln!("! {err:#}");
                }
            }
            Err(err) => eprintln!("! {err}"),
        }
    }

    handle.shutdown().await;
    printer.abort();
    Ok(())
}

async fn run(handle: &RealtimeHandle, command: Command) -> Result<()> {
    match command {
        Command::Open(chat_id) => handle.open_conversation(chat_id).await?,
        Command::Send(content) => {
            handle.set_draft(&content).await?;
            handle.send_draft().await?;
        }
        Command::Retry(position) => {
            let correlation_id = failed_message_at(handle, position).await?;
            handle.retry(correlation_id).await?;
        }
        Command::Discard(position) => {
            let correlation_id = failed_message_at(handle, position).await?;
            handle.discard(correlation_id).await?;
            if let Some(snapshot) = handle.conversation().await? {
                println!("{}", render::conversation(&snapshot));
            }
        }
        Command::Users => println!("{}", render::users(&handle.list_users().await?)),
        Command::Group { name, participants } => {
            let chat_id = handle.create_group(&name, participants).await?;
            println!("* created {name} as {chat_id}");
        }
        Command::Profile(name) => {
            handle
                .update_profile(ProfileUpdateRequest {
                    name: Some(name),
                    ..ProfileUpdateRequest::default()
                })
                .await?;
        }
        Command::Resync => handle.resynchronize().await?,
        Command::Help => println!("{}", commands::HELP),
        Command::Quit => {}
    }
    Ok(())
}

async fn failed_message_at(
    handle: &RealtimeHandle,
    position: usize,
) -> Result<CorrelationId> {
    let snapshot = handle
        .conversation()
        .await?
        .ok_or_else(|| anyhow!("no conversation is open"))?;
    let message = snapshot
        .messages
        .get(position - 1)
        .ok_or_else(|| anyhow!("there is no message {position}"))?;
    if !message.is_failed() {
        return Err(anyhow!("message {position} has not failed"));
    }
    message
        .correlation_id
        .clone()
        .ok_or_else(|| anyhow!("message {position} was not sent from this session"))
}
