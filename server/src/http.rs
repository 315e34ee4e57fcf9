//! HTTP surface: WebSocket endpoint, command API, static files
//!
//! The socket-accept layer for the event bus plus the small REST API the
//! game overlay uses to inject commands directly.

use crate::context::AppContext;
use crate::session;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use log::info;
use serde::Deserialize;
use shared::{Command, Direction, DirectionMask, Event};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

pub fn router(ctx: Arc<AppContext>, data_dir: Option<PathBuf>) -> Router {
    let mut router = Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/api/v1/move/{direction}", get(move_explicit))
        .route("/api/v1/chat/move", get(move_classified));

    if let Some(dir) = data_dir {
        info!("Serving data directory '{}' at /data", dir.display());
        router = router.nest_service("/data", ServeDir::new(dir));
    }

    router.layer(CorsLayer::permissive()).with_state(ctx)
}

/// Binds the listener and serves until the task is dropped.
pub async fn serve(router: Router, port: u16) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!("Server listening on {}", listener.local_addr()?);
    axum::serve(listener, router).await
}

/// Variant of [`serve`] over an already-bound listener, used by tests
/// that need an ephemeral port.
pub async fn serve_with(listener: TcpListener, router: Router) -> std::io::Result<()> {
    axum::serve(listener, router).await
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(ctx): State<Arc<AppContext>>) -> Response {
    ws.on_upgrade(move |socket| session::run_session(socket, ctx))
}

#[derive(Debug, Deserialize)]
struct MoveParams {
    #[serde(default)]
    id: String,
    #[serde(default)]
    text: String,
}

async fn move_explicit(
    Path(direction): Path<String>,
    Query(params): Query<MoveParams>,
    State(ctx): State<Arc<AppContext>>,
) -> Result<String, (StatusCode, String)> {
    let direction: Direction = direction
        .parse()
        .map_err(|e: String| (StatusCode::BAD_REQUEST, e))?;

    ctx.dispatcher
        .broadcast(&Event::Command(Command {
            id: params.id,
            text: params.text.clone(),
            direction,
        }))
        .await;

    Ok(format!("Moved {} with text '{}'", direction, params.text))
}

async fn move_classified(
    Query(params): Query<MoveParams>,
    State(ctx): State<Arc<AppContext>>,
) -> Result<String, (StatusCode, String)> {
    let Some(classifier) = ctx.classifier() else {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "Classifier not initialized.".to_string(),
        ));
    };

    let mask = DirectionMask::LEFT | DirectionMask::RIGHT | DirectionMask::DOWN;
    let result = classifier.classify(&params.text, mask);

    ctx.dispatcher
        .broadcast(&Event::Command(Command {
            id: params.id,
            text: result.matched.clone(),
            direction: result.direction,
        }))
        .await;

    Ok(format!(
        "Moved {} with confidence {} and text '{}' from input '{}'",
        result.direction, result.confidence, result.matched, params.text
    ))
}
