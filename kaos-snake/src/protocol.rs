//! Wire protocol.
//!
//! JSON text frames, one message per frame, discriminated by `type`.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::grid::Cell;
use crate::room::Slot;
use crate::snake::SnakeStats;

/// Client -> server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Register (or re-register) a nickname and join matchmaking.
    SetNick { nick: String },
    /// Local countdown animation finished.
    CountdownDone,
    /// Direction vector. Only unit axis vectors are honoured.
    Input { dx: i32, dy: i32 },
    Rematch,
    /// Leave the current match and queue again.
    FindNew,
}

impl ClientEvent {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Server -> client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    NickAccepted {
        nick: String,
    },
    NickError {
        reason: String,
    },
    MatchStart {
        room: String,
        role: Slot,
        /// Round length in seconds.
        duration: u64,
        /// Countdown length in seconds.
        countdown: u64,
        n1: String,
        n2: String,
    },
    State(Snapshot),
    RematchWait {
        p1: bool,
        p2: bool,
    },
}

impl ServerEvent {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Match result as seen by clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Winner {
    P1,
    P2,
    Tie,
}

/// One snake inside a [`Snapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnakeView {
    pub body: Vec<Cell>,
    pub score: u32,
    pub stats: SnakeStats,
}

/// Broadcast match state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub tick: u64,
    /// Remaining round time, whole seconds.
    pub left: u64,
    pub food: Option<Cell>,
    pub sfood: Option<Cell>,
    pub p1: SnakeView,
    pub p2: SnakeView,
    pub over: bool,
    pub winner: Option<Winner>,
    pub n1: String,
    pub n2: String,
}
