use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    config::{load_settings_from, SETTINGS_FILE},
    session_manager, ChatClient, ChatMessage, ClientSettings, MediaAsset, SessionManager, SyncEvent,
};
use shared::domain::{ConversationId, UserId};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Terminal client for the chat service")]
struct Cli {
    #[arg(long, default_value = SETTINGS_FILE)]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Signup {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    Login {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
    },
    Logout,
    Whoami,
    /// List users, optionally filtered by a username fragment.
    Users {
        #[arg(long, default_value = "")]
        search: String,
    },
    Conversations,
    /// Open (or reuse) a direct conversation with another user.
    Start {
        participant_id: i64,
    },
    /// Show a thread and chat in it. Lines from stdin are sent; `/image <path>`
    /// uploads a picture and `/quit` leaves.
    Open {
        conversation_id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = load_settings_from(&cli.config);
    let sessions = session_manager(&settings);

    match cli.command {
        Command::Signup {
            username,
            email,
            password,
        } => {
            let session = sessions.signup(&username, &email, &password).await?;
            println!(
                "signed up as {} (user_id={})",
                session.user.username, session.user.id
            );
        }
        Command::Login { username, password } => {
            let session = sessions.login(&username, &password).await?;
            println!(
                "logged in as {} (user_id={})",
                session.user.username, session.user.id
            );
        }
        Command::Logout => {
            sessions.logout().await?;
            println!("logged out");
        }
        Command::Whoami => match sessions.restore().await {
            Some(session) => println!("{} (user_id={})", session.user.username, session.user.id),
            None => println!("not logged in"),
        },
        Command::Users { search } => {
            let client = authenticated(&settings, &sessions).await?;
            let local_user = client.session().user_id();
            for user in client.search_users(&search).await? {
                if user.id == local_user {
                    continue;
                }
                match &user.email {
                    Some(email) => println!("{:>6}  {} <{email}>", user.id.0, user.username),
                    None => println!("{:>6}  {}", user.id.0, user.username),
                }
            }
        }
        Command::Conversations => {
            let client = authenticated(&settings, &sessions).await?;
            let local_user = client.session().user_id();
            for conversation in client.conversations().await? {
                let name = conversation
                    .counterpart(local_user)
                    .map(|user| user.username.as_str())
                    .unwrap_or("(nobody)");
                println!(
                    "{:>6}  {name}: {}",
                    conversation.id.0,
                    conversation.preview()
                );
            }
        }
        Command::Start { participant_id } => {
            let client = authenticated(&settings, &sessions).await?;
            let conversation = client.start_conversation(UserId(participant_id)).await?;
            println!("conversation_id={}", conversation.id);
        }
        Command::Open { conversation_id } => {
            let client = authenticated(&settings, &sessions).await?;
            open_thread(&settings, &client, ConversationId(conversation_id)).await?;
        }
    }

    Ok(())
}

async fn authenticated(settings: &ClientSettings, sessions: &SessionManager) -> Result<ChatClient> {
    let session = sessions
        .restore()
        .await
        .ok_or_else(|| anyhow!("not logged in; run `login` first"))?;
    ChatClient::new(settings, session)
}

async fn open_thread(
    settings: &ClientSettings,
    client: &ChatClient,
    conversation_id: ConversationId,
) -> Result<()> {
    let thread = client.open_thread();
    let mut events = thread.subscribe_events();

    match thread.open(conversation_id).await? {
        Some(history) => {
            for message in history.iter().rev() {
                println!("{}", render(message));
            }
        }
        None => warn!(
            conversation_id = conversation_id.0,
            "history unavailable; showing live messages only"
        ),
    }
    println!(
        "-- connected to conversation {conversation_id} via {}; /quit to leave --",
        settings.ws_base_url()?
    );

    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SyncEvent::MessageReceived(message)) => println!("{}", render(&message)),
                Ok(SyncEvent::ConnectionChanged(state)) => println!("-- {state:?} --"),
                Ok(SyncEvent::Error(message)) => eprintln!("!! {message}"),
                Ok(SyncEvent::HistoryLoaded { .. } | SyncEvent::MessageSent(_)) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "terminal fell behind the event stream")
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim_end();
        if line == "/quit" {
            break;
        }
        if let Some(path) = line.strip_prefix("/image ") {
            match read_asset(Path::new(path.trim())).await {
                Ok(asset) => match thread.send_media(conversation_id, asset).await {
                    Ok(created) => println!("-- image sent (message {}) --", created.id),
                    Err(err) => eprintln!("!! {err}"),
                },
                Err(err) => eprintln!("!! {err:#}"),
            }
            continue;
        }
        if thread.send(conversation_id, line).await.is_none() && !line.trim().is_empty() {
            eprintln!("!! not connected; message not sent");
        }
    }

    thread.disconnect().await;
    printer.abort();
    Ok(())
}

async fn read_asset(path: &Path) -> Result<MediaAsset> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read image '{}'", path.display()))?;
    let mut asset = MediaAsset::new(bytes);
    if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
        asset = asset.with_filename(name);
    }
    let mime_type = match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => Some("image/png"),
        Some("gif") => Some("image/gif"),
        Some("webp") => Some("image/webp"),
        _ => None,
    };
    if let Some(mime_type) = mime_type {
        asset = asset.with_mime_type(mime_type);
    }
    Ok(asset)
}

fn render(message: &ChatMessage) -> String {
    let author = message
        .sender_username
        .clone()
        .unwrap_or_else(|| format!("user {}", message.sender_id));
    let body = match (&message.text, &message.media_url) {
        (Some(text), Some(url)) => format!("{text} [image {url}]"),
        (Some(text), None) => text.clone(),
        (None, Some(url)) => format!("[image {url}]"),
        (None, None) => String::new(),
    };
    format!(
        "[{}] {author}: {body}",
        message.timestamp.format("%Y-%m-%d %H:%M")
    )
}
