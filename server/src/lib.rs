//! # Event Bus & Leaderboard Server Library
//!
//! This library implements the server for a chat-driven game: a typed,
//! bidirectional event bus over persistent WebSocket connections and a
//! durable leaderboard that stays consistent under concurrent
//! submissions.
//!
//! ## Core Responsibilities
//!
//! ### Event Distribution
//! Connected clients exchange tagged JSON frames. Inbound frames are
//! decoded through a swappable tag registry; outbound events are fanned
//! out to a point-in-time snapshot of the connection set, with every
//! peer's send succeeding or failing independently.
//!
//! ### Leaderboard Consistency
//! Score submissions update four buckets (today/all-time high score and
//! high combo) as one atomic unit under a single write gate, persist
//! before caching, and republish the aggregate to all clients.
//!
//! ### Ingestion & Plumbing
//! Twitch chat is ingested over IRC-on-WebSocket, classified into
//! movement commands and broadcast; a small REST API and static file
//! serving round out the HTTP surface.
//!
//! ## Module Organization
//!
//! - [`connections`]: live connection registry with snapshot iteration
//! - [`dispatch`]: broadcast/single-recipient fan-out
//! - [`leaderboard`]: bucket algebra and the submit/query engine
//! - [`persist`]: SQLite record store and audit logs
//! - [`session`]: per-connection read loop and frame routing
//! - [`classifier`]: chat-text to direction classification
//! - [`twitch`]: chat-source connection
//! - [`http`]: axum router, WebSocket upgrade, REST endpoints
//! - [`context`]: shared service wiring

pub mod classifier;
pub mod connections;
pub mod context;
pub mod dispatch;
pub mod http;
pub mod leaderboard;
pub mod persist;
pub mod session;
pub mod twitch;
