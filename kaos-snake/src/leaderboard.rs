//! Highscore leaderboard.
//!
//! The engine only needs "durable append + ranked query" from its
//! leaderboard, expressed by the [`ScoreBoard`] trait. [`Highscores`] is the
//! bundled implementation:
//!
//! - Descending score, ties broken by earlier submission
//! - Capped retention (lowest entries fall off)
//! - Optional JSON file, written atomically by a debounced flusher

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::error::Result;

/// A leaderboard record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighscoreEntry {
    pub nick: String,
    pub score: u32,
    /// Submission time, unix millis.
    pub at: i64,
}

/// Leaderboard collaborator used by the engine.
pub trait ScoreBoard: Send + Sync {
    /// Append an eligible outcome. Returns the 1-indexed rank if it was kept.
    fn submit(&self, nick: &str, score: u32) -> Option<usize>;

    /// Top `limit` records, best first.
    fn top(&self, limit: usize) -> Vec<HighscoreEntry>;
}

/// Sort key: higher score first, then earlier time, then arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct SortKey {
    score: Reverse<u32>,
    at: i64,
    seq: u64,
}

/// In-memory capped leaderboard with optional file persistence.
pub struct Highscores {
    cap: usize,
    records: RwLock<BTreeMap<SortKey, HighscoreEntry>>,
    seq: AtomicU64,
    path: Option<PathBuf>,
    dirty: Notify,
}

impl Highscores {
    /// Memory-only board.
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            records: RwLock::new(BTreeMap::new()),
            seq: AtomicU64::new(0),
            path: None,
            dirty: Notify::new(),
        }
    }

    /// Board backed by `path`. A missing or unreadable file starts empty.
    pub fn open(path: impl Into<PathBuf>, cap: usize) -> Self {
        let path = path.into();
        let mut board = Self::new(cap);

        match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<Vec<HighscoreEntry>>(&text) {
                Ok(entries) => {
                    for entry in entries {
                        board.insert(entry);
                    }
                    tracing::info!(path = %path.display(), entries = board.len(), "loaded highscores");
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "highscore file unreadable, starting empty");
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "could not open highscore file");
            }
        }

        board.path = Some(path);
        board
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn insert(&self, entry: HighscoreEntry) -> Option<usize> {
        let key = SortKey {
            score: Reverse(entry.score),
            at: entry.at,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
        };

        let mut records = self.records.write();
        records.insert(key, entry);
        while records.len() > self.cap {
            records.pop_last();
        }
        records.keys().position(|k| *k == key).map(|i| i + 1)
    }

    /// Write the board to its file (temp file + rename). No-op without a path.
    pub fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let entries = self.top(self.cap);
        let json = serde_json::to_string_pretty(&entries)?;

        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Spawn a task that flushes `debounce` after the first change of a burst.
    pub fn spawn_flusher(self: &Arc<Self>, debounce: Duration) -> JoinHandle<()> {
        let board = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                board.dirty.notified().await;
                tokio::time::sleep(debounce).await;
                if let Err(e) = board.flush() {
                    tracing::warn!(error = %e, "highscore flush failed");
                }
            }
        })
    }
}

impl ScoreBoard for Highscores {
    fn submit(&self, nick: &str, score: u32) -> Option<usize> {
        let rank = self.insert(HighscoreEntry {
            nick: nick.to_string(),
            score,
            at: now_millis(),
        });
        if self.path.is_some() {
            self.dirty.notify_one();
        }
        rank
    }

    fn top(&self, limit: usize) -> Vec<HighscoreEntry> {
        self.records.read().values().take(limit).cloned().collect()
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
