//! Error types for kaos-snake.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, KaosSnakeError>;

#[derive(Error, Debug)]
pub enum KaosSnakeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Invalid config: {reason}")]
    Config { reason: String },
}

impl KaosSnakeError {
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }
}

/// Why a nickname registration was refused.
///
/// The `Display` text is what the client sees in `nick_error`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NickError {
    #[error("nickname cannot be empty")]
    Empty,

    #[error("nickname can be at most {max} characters")]
    TooLong { max: usize },

    #[error("nickname contains a banned word")]
    Banned,

    #[error("nickname is reserved")]
    Reserved,

    #[error("nickname is already in use")]
    Taken,

    #[error("already queued or in a match")]
    AlreadyPlaying,
}
