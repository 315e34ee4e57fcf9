//! Twitch chat ingestion
//!
//! Connects to the public IRC-over-WebSocket gateway with an anonymous
//! read-only login and turns each channel message into a classify,
//! audit-log and broadcast pipeline. The connection is re-established
//! with a delay whenever the gateway drops it.

use crate::context::AppContext;
use crate::persist::ChatLogEntry;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use rand::Rng;
use shared::{Command, DirectionMask, Event};
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

const GATEWAY: &str = "wss://irc-ws.chat.twitch.tv:443";
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// One channel message as parsed off the IRC line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: String,
    pub username: String,
    pub text: String,
}

/// Runs the chat-source loop until the process exits.
pub async fn run_chat_source(ctx: Arc<AppContext>, channel: String) {
    loop {
        match connect_and_listen(&ctx, &channel).await {
            Ok(()) => info!("Chat connection to #{} closed", channel),
            Err(e) => warn!("Chat connection to #{} failed: {}", channel, e),
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

async fn connect_and_listen(
    ctx: &Arc<AppContext>,
    channel: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (stream, _) = connect_async(GATEWAY).await?;
    let (mut tx, mut rx) = stream.split();

    // anonymous read-only login; tags carry the message ids
    let nick = format!("justinfan{}", rand::thread_rng().gen_range(10_000..100_000));
    tx.send(Message::text("CAP REQ :twitch.tv/tags")).await?;
    tx.send(Message::text(format!("NICK {}", nick))).await?;
    tx.send(Message::text(format!("JOIN #{}", channel))).await?;
    info!("Joined Twitch chat #{} as {}", channel, nick);

    while let Some(message) = rx.next().await {
        let message = message?;
        if !message.is_text() {
            continue;
        }
        let payload = message.into_text()?;
        for line in payload.lines() {
            if line.starts_with("PING") {
                tx.send(Message::text("PONG :tmi.twitch.tv")).await?;
            } else if let Some(chat) = parse_privmsg(line) {
                handle_chat_message(ctx, chat).await;
            }
        }
    }

    Ok(())
}

/// Parses one IRC line of the shape
/// `@id=...;tag=value :nick!user@host PRIVMSG #channel :message text`.
/// Returns `None` for anything that is not a channel message.
fn parse_privmsg(line: &str) -> Option<ChatMessage> {
    let (tags, rest) = match line.strip_prefix('@') {
        Some(stripped) => {
            let (tags, rest) = stripped.split_once(' ')?;
            (Some(tags), rest)
        }
        None => (None, line),
    };

    let rest = rest.strip_prefix(':')?;
    let (prefix, rest) = rest.split_once(' ')?;
    let (command, rest) = rest.split_once(' ')?;
    if command != "PRIVMSG" {
        return None;
    }
    let (_channel, text) = rest.split_once(" :")?;

    let username = prefix.split('!').next().unwrap_or(prefix).to_string();
    let id = tags
        .and_then(|tags| tags.split(';').find_map(|tag| tag.strip_prefix("id=")))
        .unwrap_or_default()
        .to_string();

    Some(ChatMessage {
        id,
        username,
        text: text.to_string(),
    })
}

/// Classifies a chat message and pushes the resulting command to every
/// connected client. Chat may only steer left, right and down.
async fn handle_chat_message(ctx: &Arc<AppContext>, chat: ChatMessage) {
    debug!("Chat message from {}: {}", chat.username, chat.text);

    let Some(classifier) = ctx.classifier() else {
        return;
    };

    let mask = DirectionMask::LEFT | DirectionMask::RIGHT | DirectionMask::DOWN;
    let result = classifier.classify(&chat.text, mask);

    // the audit trail is written regardless of the broadcast outcome
    let entry = ChatLogEntry {
        message_id: chat.id.clone(),
        username: chat.username.clone(),
        text: chat.text.clone(),
        direction: result.direction,
        confidence: result.confidence,
        recorded_at: Utc::now(),
    };
    if let Err(e) = ctx.store.append_chat(&entry) {
        warn!("Chat audit entry not stored: {}", e);
    }

    ctx.dispatcher
        .broadcast(&Event::Command(Command {
            id: chat.id,
            text: result.matched,
            direction: result.direction,
        }))
        .await;
}
