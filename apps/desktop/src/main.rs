use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{load_settings_from, ChatClient, ViewEffect};
use shared::{
    domain::{MessageId, MessageKind, MessageStatus, SessionId},
    protocol::{FileUpload, Message},
};
use tracing_subscriber::EnvFilter;

mod loopback;

use loopback::LoopbackHost;

#[derive(Parser, Debug)]
#[command(about = "Drive a chat session timeline against a loopback host")]
struct Args {
    #[arg(long, default_value = "session-1")]
    session: String,
    #[arg(long, default_value = "me")]
    user: String,
    #[arg(long, default_value = "peer")]
    peer: String,
    /// Fail every Nth send (0 never fails).
    #[arg(long, default_value_t = 0)]
    fail_every: u64,
    /// Retry failed messages once with failures disabled.
    #[arg(long)]
    retry: bool,
    #[arg(long)]
    attach: Option<PathBuf>,
    #[arg(long, default_value = client_core::config::DEFAULT_SETTINGS_FILE)]
    settings: PathBuf,
    /// Text messages to send, in order.
    messages: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let settings = load_settings_from(&args.settings);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let session_id = SessionId::new(args.session.clone());
    let host = Arc::new(LoopbackHost::new(
        args.fail_every,
        seed_history(&session_id, &args.peer, &args.user),
    ));
    let client = ChatClient::new_with_settings(args.user.clone(), host.clone(), settings);
    let _bridge = client.attach_bridge(host.bridge());

    let mut view = client
        .open_view(session_id.clone(), args.peer.clone())
        .await
        .context("failed to open session")?;

    let mut sends = Vec::new();
    for text in &args.messages {
        sends.push(view.send_text(text.clone()));
    }
    if let Some(path) = &args.attach {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "attachment".to_string());
        sends.push(view.send_file(FileUpload {
            path: path.clone(),
            file_name,
            mime_type: None,
        }));
    }
    for send in sends {
        if let Err(err) = send.await? {
            tracing::warn!(error = %err, "send did not complete");
        }
    }

    while let Some(effect) = view.try_next_effect() {
        match effect {
            ViewEffect::ScrollToLatest { message_id } => {
                tracing::debug!(%message_id, "scroll to latest");
            }
            ViewEffect::SendFailed { message_id, reason } => {
                println!("! {message_id} failed: {reason}");
            }
        }
    }

    if args.retry {
        host.set_fail_every(0);
        let failed: Vec<Message> = view
            .timeline()
            .await
            .iter()
            .filter(|m| m.status == MessageStatus::Failed)
            .cloned()
            .collect();
        for message in failed {
            view.retry(message).await??;
        }
    }

    view.close();
    let timeline = client.store().get(&session_id).await;
    println!("{}", serde_json::to_string_pretty(timeline.as_ref())?);
    Ok(())
}

fn seed_history(session_id: &SessionId, peer: &str, user: &str) -> Vec<Message> {
    let now = chrono::Utc::now().timestamp_millis();
    ["hey", "are you around?"]
        .into_iter()
        .enumerate()
        .map(|(i, text)| {
            let at = now - 60_000 + i as i64 * 1_000;
            Message {
                session_id: session_id.clone(),
                message_id: MessageId::new(format!("h-{i}")),
                created_at: at,
                updated_at: at,
                status: MessageStatus::Sent,
                kind: MessageKind::Text,
                content: text.to_string(),
                from_id: peer.to_string(),
                to_id: user.to_string(),
            }
        })
        .collect()
}
