//! WebSocket front for the snake duel engine.
//!
//! ```bash
//! KAOS_SNAKE_BIND=0.0.0.0:3000 KAOS_SNAKE_CONFIG=game.json cargo run -p kaos-snake-server
//! ```
//!
//! - `GET /ws`: one game session per socket, JSON text frames both ways
//! - `GET /highscores`: leaderboard as JSON

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use kaos_snake::{init_tracing, Arena, ClientEvent, GameConfig, Highscores, TracingConfig};

const LEADERBOARD_LIMIT: usize = 100;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing(TracingConfig::new("kaos-snake-server").from_env());

    let config = match std::env::var("KAOS_SNAKE_CONFIG") {
        Ok(path) => GameConfig::from_json_file(&path)?,
        Err(_) => GameConfig::default(),
    }
    .from_env()?;

    let scores = Arc::new(match &config.highscore_path {
        Some(path) => Highscores::open(path.clone(), config.highscore_cap),
        None => Highscores::new(config.highscore_cap),
    });
    if scores.path().is_some() {
        scores.spawn_flusher(config.highscore_flush());
    }

    tracing::info!(
        grid = %format!("{}x{}", config.grid_width, config.grid_height),
        tick_ms = config.tick_ms,
        round_secs = config.round_secs,
        "engine configured"
    );
    let arena = Arena::new(config, scores.clone())?;

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/highscores", get(highscores))
        .with_state(arena);

    let bind = std::env::var("KAOS_SNAKE_BIND").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(%bind, "listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(e) = scores.flush() {
        tracing::error!(error = %e, "final highscore flush failed");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

async fn highscores(State(arena): State<Arc<Arena>>) -> impl IntoResponse {
    Json(arena.leaderboard(LEADERBOARD_LIMIT))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(arena): State<Arc<Arena>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(arena, socket, addr))
}

async fn handle_socket(arena: Arc<Arena>, socket: WebSocket, addr: SocketAddr) {
    let (id, mut events) = arena.connect(addr.ip());
    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let text = match event.encode() {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(session = id, error = %e, "failed to encode event");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match ClientEvent::parse(&text) {
                Ok(event) => arena.handle(id, event),
                Err(e) => tracing::debug!(session = id, error = %e, "malformed client event"),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(session = id, error = %e, "socket error");
                break;
            }
        }
    }

    arena.disconnect(id);
    writer.abort();
}
