//! Integration tests for the event bus and leaderboard
//!
//! These tests validate cross-component interactions over real
//! WebSocket connections against an in-process server.

use chrono::TimeZone;
use futures_util::{SinkExt, StreamExt};
use server::connections::ConnectionRegistry;
use server::context::AppContext;
use server::http;
use server::leaderboard::Leaderboard;
use server::persist::SqliteStore;
use shared::{encode, Command, Direction, Event, EventRegistry, ScoreStats, ScoreSubmission};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn spawn_server() -> (Arc<AppContext>, SocketAddr) {
    let ctx = AppContext::open_in_memory().expect("failed to build context");
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind listener");
    let addr = listener.local_addr().unwrap();

    let app = http::router(Arc::clone(&ctx), None);
    tokio::spawn(http::serve_with(listener, app));

    (ctx, addr)
}

async fn connect(addr: SocketAddr) -> WsClient {
    let (ws, _) = connect_async(format!("ws://{}/ws", addr))
        .await
        .expect("failed to connect");
    ws
}

/// Waits until the server side has registered `count` connections.
async fn wait_for_connections(ctx: &Arc<AppContext>, count: usize) {
    for _ in 0..100 {
        if ctx.connections.len().await == count {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("never reached {} registered connections", count);
}

async fn next_text(ws: &mut WsClient) -> String {
    loop {
        let message = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream closed")
            .expect("read failed");
        if let Message::Text(text) = message {
            return text.as_str().to_string();
        }
    }
}

fn parse_stats(frame: &str) -> ScoreStats {
    let value: serde_json::Value = serde_json::from_str(frame).unwrap();
    assert_eq!(value["type"], "scorestats");
    serde_json::from_value(value).unwrap()
}

/// WIRE PROTOCOL TESTS
mod protocol_tests {
    use super::*;

    /// A submission from one client yields a stats broadcast that every
    /// connected client receives bit-identically.
    #[tokio::test]
    async fn submission_broadcasts_stats_to_all_clients() {
        let (ctx, addr) = spawn_server().await;

        let mut sender = connect(addr).await;
        let mut observer = connect(addr).await;
        wait_for_connections(&ctx, 2).await;

        sender
            .send(Message::text(
                r#"{"type":"scoresubmission","lastCommand":"left","score":150,"combo":7}"#,
            ))
            .await
            .unwrap();

        let frame_a = next_text(&mut sender).await;
        let frame_b = next_text(&mut observer).await;
        assert_eq!(frame_a, frame_b);

        let stats = parse_stats(&frame_a);
        assert_eq!(stats.current_score, 150);
        assert_eq!(stats.current_combo, 7);
        assert_eq!(stats.today_high_score.as_ref().unwrap().value, 150);
        assert_eq!(
            stats.today_high_score.as_ref().unwrap().owner_id.as_deref(),
            Some("left")
        );
        assert_eq!(stats.today_high_combo.as_ref().unwrap().value, 7);
    }

    /// A command frame is echoed to every client unchanged.
    #[tokio::test]
    async fn command_is_echoed_to_all_clients() {
        let (ctx, addr) = spawn_server().await;

        let mut sender = connect(addr).await;
        let mut observer = connect(addr).await;
        wait_for_connections(&ctx, 2).await;

        let command = Event::Command(Command {
            id: "msg-1".to_string(),
            text: "go left".to_string(),
            direction: Direction::Left,
        });
        sender.send(Message::text(encode(&command))).await.unwrap();

        let registry = EventRegistry::with_defaults();
        let received = registry.decode(&next_text(&mut observer).await).unwrap();
        assert_eq!(received, command);
    }

    /// A high-score query is answered on the origin connection only and
    /// mutates nothing.
    #[tokio::test]
    async fn query_replies_to_origin_without_broadcast() {
        let (ctx, addr) = spawn_server().await;

        let mut asker = connect(addr).await;
        let mut other = connect(addr).await;
        wait_for_connections(&ctx, 2).await;

        asker
            .send(Message::text(r#"{"type":"highscorequery"}"#))
            .await
            .unwrap();

        let stats = parse_stats(&next_text(&mut asker).await);
        assert!(stats.today_high_score.is_none());
        assert_eq!(stats.current_score, 0);

        // the other client saw nothing
        let nothing = timeout(Duration::from_millis(200), other.next()).await;
        assert!(nothing.is_err());
        assert_eq!(ctx.leaderboard.current_stats().current_score, 0);
    }

    /// Malformed and unknown frames are dropped without closing the
    /// session; the next valid frame still gets processed.
    #[tokio::test]
    async fn bad_frames_do_not_terminate_the_session() {
        let (ctx, addr) = spawn_server().await;

        let mut client = connect(addr).await;
        wait_for_connections(&ctx, 1).await;

        client.send(Message::text("not json")).await.unwrap();
        client
            .send(Message::text(r#"{"type":"scoresubmission","combo":3}"#))
            .await
            .unwrap();
        client
            .send(Message::text(r#"{"type":"voodoo","x":1}"#))
            .await
            .unwrap();
        client
            .send(Message::text(r#"{"type":"highscorequery"}"#))
            .await
            .unwrap();

        let stats = parse_stats(&next_text(&mut client).await);
        assert_eq!(stats.current_score, 0);
        assert_eq!(ctx.connections.len().await, 1);
    }

    /// A client that disconnects is unregistered and later broadcasts
    /// still reach the remaining clients.
    #[tokio::test]
    async fn disconnect_unregisters_and_others_keep_receiving() {
        let (ctx, addr) = spawn_server().await;

        let mut leaver = connect(addr).await;
        let mut stayer = connect(addr).await;
        wait_for_connections(&ctx, 2).await;

        leaver.close(None).await.unwrap();
        wait_for_connections(&ctx, 1).await;

        stayer
            .send(Message::text(
                r#"{"type":"scoresubmission","score":10,"combo":1}"#,
            ))
            .await
            .unwrap();

        let stats = parse_stats(&next_text(&mut stayer).await);
        assert_eq!(stats.current_score, 10);
    }
}

/// SNAPSHOT SEMANTICS TESTS
mod registry_tests {
    use super::*;
    use server::dispatch::Dispatcher;

    /// A connection registered after a broadcast's snapshot was taken
    /// does not receive that broadcast.
    #[tokio::test]
    async fn late_registration_misses_earlier_broadcast() {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = Dispatcher::new(Arc::clone(&registry));

        let (tx_early, mut rx_early) = ConnectionRegistry::channel();
        registry.register(tx_early).await;

        dispatcher
            .broadcast(&Event::Command(Command {
                id: "1".to_string(),
                text: "first".to_string(),
                direction: Direction::Up,
            }))
            .await;

        let (tx_late, mut rx_late) = ConnectionRegistry::channel();
        registry.register(tx_late).await;

        assert!(rx_early.recv().await.is_some());
        assert!(rx_late.try_recv().is_err());
    }

    #[tokio::test]
    async fn double_unregister_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = ConnectionRegistry::channel();
        let peer = registry.register(tx).await;

        assert!(registry.unregister(peer.id).await);
        assert!(!registry.unregister(peer.id).await);
        assert!(!registry.unregister(peer.id).await);
        assert_eq!(registry.len().await, 0);
    }
}

/// LEADERBOARD SCENARIO TESTS
mod leaderboard_tests {
    use super::*;

    fn submission(score: i64, combo: i64, owner: &str) -> (ScoreSubmission, Option<String>) {
        (
            ScoreSubmission {
                last_command: Some(owner.to_string()),
                score_value: score,
                combo,
            },
            Some(owner.to_string()),
        )
    }

    /// The documented two-day sequence: a lower score on the same day
    /// leaves the score bucket alone but advances the combo bucket;
    /// the next day starts fresh today-records below the all-time marks.
    #[tokio::test]
    async fn two_day_submission_scenario() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let board = Leaderboard::open(store).unwrap();

        let day_one = chrono::Utc.with_ymd_and_hms(2024, 5, 17, 12, 0, 0).unwrap();
        let (sub, owner) = submission(150, 7, "left");
        board.submit(sub, owner, day_one).await.unwrap();

        let later = chrono::Utc.with_ymd_and_hms(2024, 5, 17, 15, 0, 0).unwrap();
        let (sub, owner) = submission(90, 10, "down");
        let stats = board.submit(sub, owner, later).await.unwrap();

        assert_eq!(stats.today_high_score.as_ref().unwrap().value, 150);
        assert_eq!(stats.today_high_combo.as_ref().unwrap().value, 10);

        let day_two = chrono::Utc.with_ymd_and_hms(2024, 5, 18, 9, 0, 0).unwrap();
        let (sub, owner) = submission(50, 1, "newday");
        let stats = board.submit(sub, owner, day_two).await.unwrap();

        assert_eq!(stats.today_high_score.as_ref().unwrap().value, 50);
        assert_eq!(stats.today_high_combo.as_ref().unwrap().value, 1);
        assert_eq!(stats.alltime_high_score.as_ref().unwrap().value, 150);
        assert_eq!(stats.alltime_high_combo.as_ref().unwrap().value, 10);
    }

    /// Concurrent submissions from many tasks keep the monotonic
    /// per-day invariant: the today-record always holds the maximum.
    #[tokio::test]
    async fn concurrent_submissions_keep_maximum() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let board = Arc::new(Leaderboard::open(store).unwrap());

        let mut handles = Vec::new();
        for score in 1..=20i64 {
            let board = Arc::clone(&board);
            handles.push(tokio::spawn(async move {
                let (sub, owner) = (
                    ScoreSubmission {
                        last_command: Some(format!("task-{}", score)),
                        score_value: score * 10,
                        combo: score,
                    },
                    Some(format!("task-{}", score)),
                );
                board.submit(sub, owner, chrono::Utc::now()).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stats = board.current_stats();
        assert_eq!(stats.today_high_score.as_ref().unwrap().value, 200);
        assert_eq!(stats.alltime_high_score.as_ref().unwrap().value, 200);
        assert_eq!(stats.today_high_combo.as_ref().unwrap().value, 20);
    }

    /// Stats survive a reopen of the same database file, including the
    /// all-time pointers recomputed from history.
    #[tokio::test]
    async fn reopened_store_recovers_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scores.db");

        {
            let store = Arc::new(SqliteStore::open(&path).unwrap());
            let board = Leaderboard::open(store).unwrap();
            let (sub, owner) = submission(700, 30, "historic");
            let at = chrono::Utc.with_ymd_and_hms(2024, 5, 15, 12, 0, 0).unwrap();
            board.submit(sub, owner, at).await.unwrap();
        }

        let store = Arc::new(SqliteStore::open(&path).unwrap());
        let board = Leaderboard::open(store).unwrap();
        let stats = board.current_stats();

        assert_eq!(stats.alltime_high_score.as_ref().unwrap().value, 700);
        assert_eq!(
            stats
                .alltime_high_score
                .as_ref()
                .unwrap()
                .owner_id
                .as_deref(),
            Some("historic")
        );
        assert_eq!(stats.alltime_high_combo.as_ref().unwrap().value, 30);
    }
}
