//! Per-connection session handling
//!
//! Each accepted WebSocket gets one read loop and one writer task. The
//! read loop decodes inbound frames and routes them; a single bad frame
//! is dropped and never terminates the session.

use crate::connections::{ConnectionRegistry, Peer};
use crate::context::AppContext;
use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::{DecodeError, Event};
use std::sync::Arc;

/// Drives one client connection until it closes.
///
/// The socket is split: the writer task drains the peer's frame channel
/// into the sink, while this task owns the inbound half. Both halves
/// unregister the peer on failure; unregistering twice is safe.
pub async fn run_session(socket: WebSocket, ctx: Arc<AppContext>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (sender, mut outbound) = ConnectionRegistry::channel();
    let peer = ctx.connections.register(sender).await;
    let peer_id = peer.id;

    let writer_ctx = Arc::clone(&ctx);
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if let Err(e) = ws_tx.send(Message::Text(frame.into())).await {
                warn!("Connection {}: write failed: {}", peer_id, e);
                writer_ctx.connections.unregister(peer_id).await;
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(Message::Text(text)) => handle_frame(&ctx, &peer, text.as_str()).await,
            Ok(Message::Close(_)) => break,
            // ping/pong are answered by the protocol layer; binary
            // frames are not part of the protocol
            Ok(_) => {}
            Err(e) => {
                debug!("Connection {}: read failed: {}", peer_id, e);
                break;
            }
        }
    }

    ctx.connections.unregister(peer_id).await;
    drop(peer);
    let _ = writer.await;
}

/// Decodes one inbound frame and routes it.
pub(crate) async fn handle_frame(ctx: &Arc<AppContext>, origin: &Peer, raw: &str) {
    match ctx.events.decode(raw) {
        Ok(Event::Command(cmd)) => {
            info!("Received command: \"{}\" => {}", cmd.text, cmd.direction);
            ctx.dispatcher.broadcast(&Event::Command(cmd)).await;
        }
        Ok(Event::ScoreSubmission(sub)) => {
            let owner_id = sub.last_command.clone();
            match ctx.leaderboard.submit(sub, owner_id, Utc::now()).await {
                Ok(stats) => ctx.dispatcher.broadcast(&Event::ScoreStats(stats)).await,
                Err(e) => {
                    error!(
                        "Connection {}: score submission not stored: {}",
                        origin.id, e
                    );
                }
            }
        }
        Ok(Event::HighScoreQuery) => {
            let stats = ctx.leaderboard.current_stats();
            let _ = ctx.dispatcher.send_to(origin, &Event::ScoreStats(stats)).await;
        }
        Ok(Event::NoOp) => debug!("Connection {}: noop frame", origin.id),
        // no decoder is registered for stats frames; kept for exhaustiveness
        Ok(Event::ScoreStats(_)) => {}
        Err(DecodeError::UnknownVariant(_)) => {}
        Err(err @ DecodeError::MalformedPayload { .. }) => {
            warn!("Connection {}: dropping frame: {}", origin.id, err);
        }
    }
}
