//! # kaos-snake
//!
//! Server-authoritative engine for a two-player snake game.
//!
//! ## Features
//!
//! - **Matchmaking**: pairs waiting players, attaches a bot after a timeout
//! - **Countdown barrier**: rounds start when every human is ready, or when
//!   the safety timer fires
//! - **Tick engine**: deterministic movement, collision, food and scoring
//! - **Rematch**: same room, fresh round, once every human agrees
//! - **Leaderboard**: capped highscores persisted to a JSON file
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use kaos_snake::{Arena, ClientEvent, GameConfig, Highscores};
//!
//! let config = GameConfig::default();
//! let scores = Arc::new(Highscores::new(config.highscore_cap));
//! let arena = Arena::new(config, scores)?;
//!
//! let (id, mut events) = arena.connect("127.0.0.1".parse()?);
//! arena.handle(id, ClientEvent::SetNick { nick: "alice".into() });
//! while let Some(event) = events.recv().await {
//!     println!("{}", event.encode()?);
//! }
//! ```

pub mod arena;
pub mod bot;
pub mod config;
pub mod error;
pub mod grid;
pub mod leaderboard;
pub mod matchmaker;
pub mod protocol;
pub mod ratelimit;
pub mod room;
pub mod session;
pub mod snake;
pub mod telemetry;

// Re-exports
pub use arena::{Arena, RoomHandle};
pub use config::{GameConfig, SpecialPolicy};
pub use error::{KaosSnakeError, NickError, Result};
pub use grid::{Cell, Dir, Grid};
pub use leaderboard::{HighscoreEntry, Highscores, ScoreBoard};
pub use matchmaker::{Enqueued, Matchmaker, MatchmakerError};
pub use protocol::{ClientEvent, ServerEvent, SnakeView, Snapshot, Winner};
pub use ratelimit::RateLimiter;
pub use room::{Outcome, Phase, Room, RoomId, Seat, Slot};
pub use session::{Session, SessionId, SessionRegistry};
pub use snake::{Snake, SnakeStats};
pub use telemetry::{init_tracing, TracingConfig};
