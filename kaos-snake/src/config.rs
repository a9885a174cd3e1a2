//! Game configuration.
//!
//! Grid size, tick rate, fallback delay, broadcast throttling and the
//! leaderboard file all come from here.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{KaosSnakeError, Result};

/// How special food gets spawned after normal food is eaten.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SpecialPolicy {
    /// Roll once per normal food eaten.
    Chance { probability: f64 },
    /// Spawn on every `count`-th normal food eaten in the match.
    Every { count: u32 },
}

impl Default for SpecialPolicy {
    fn default() -> Self {
        SpecialPolicy::Chance { probability: 0.20 }
    }
}

/// Words rejected anywhere inside a nickname (case-insensitive).
pub const DEFAULT_BANNED_WORDS: &[&str] = &[
    "sex", "porno", "porn", "sik", "orospu", "amcık", "amq", "göt", "aq", "fuck", "shit",
    "asshole", "dick", "pussy", "cunt", "bitch", "nigger", "cock", "cum", "xxx",
];

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub grid_width: i32,
    pub grid_height: i32,
    pub tick_ms: u64,
    /// Round length, countdown excluded.
    pub round_secs: u64,
    pub countdown_secs: u64,
    /// Forces a match to start if clients never report countdown completion.
    pub safety_start_ms: u64,
    /// How long a lone queue entry waits before a bot is attached.
    pub bot_fallback_ms: u64,
    /// Broadcast every Nth tick. The terminal snapshot is always sent.
    pub snapshot_every: u64,
    pub initial_length: usize,
    pub special_bonus: u32,
    pub special_ttl_ms: u64,
    pub special_policy: SpecialPolicy,
    /// Finished rooms are dropped after this grace period.
    pub room_grace_secs: u64,
    pub input_min_interval_ms: u64,
    pub highscore_cap: usize,
    pub highscore_path: Option<PathBuf>,
    pub highscore_flush_ms: u64,
    pub nick_max_len: usize,
    pub banned_words: Vec<String>,
    pub seed: Option<u64>,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            grid_width: 40,
            grid_height: 30,
            tick_ms: 100,
            round_secs: 300,
            countdown_secs: 3,
            safety_start_ms: 4000,
            bot_fallback_ms: 1500,
            snapshot_every: 1,
            initial_length: 5,
            special_bonus: 10,
            special_ttl_ms: 10_000,
            special_policy: SpecialPolicy::default(),
            room_grace_secs: 600,
            input_min_interval_ms: 20,
            highscore_cap: 100,
            highscore_path: Some(PathBuf::from("highscores.json")),
            highscore_flush_ms: 500,
            nick_max_len: 15,
            banned_words: DEFAULT_BANNED_WORDS.iter().map(|w| w.to_string()).collect(),
            seed: None,
        }
    }
}

impl GameConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a config from a JSON file. Missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: GameConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `KAOS_SNAKE_*` environment overrides on top of `self`.
    pub fn from_env(mut self) -> Result<Self> {
        if let Some(v) = env_u64("KAOS_SNAKE_TICK_MS")? {
            self.tick_ms = v;
        }
        if let Some(v) = env_u64("KAOS_SNAKE_ROUND_SECS")? {
            self.round_secs = v;
        }
        if let Some(v) = env_u64("KAOS_SNAKE_BOT_FALLBACK_MS")? {
            self.bot_fallback_ms = v;
        }
        if let Ok(path) = std::env::var("KAOS_SNAKE_HIGHSCORES") {
            self.highscore_path = if path.is_empty() {
                None
            } else {
                Some(PathBuf::from(path))
            };
        }
        self.validate()?;
        Ok(self)
    }

    pub fn with_grid(mut self, width: i32, height: i32) -> Self {
        self.grid_width = width;
        self.grid_height = height;
        self
    }

    pub fn with_tick_ms(mut self, tick_ms: u64) -> Self {
        self.tick_ms = tick_ms;
        self
    }

    pub fn with_round_secs(mut self, secs: u64) -> Self {
        self.round_secs = secs;
        self
    }

    pub fn with_special_policy(mut self, policy: SpecialPolicy) -> Self {
        self.special_policy = policy;
        self
    }

    pub fn with_snapshot_every(mut self, every: u64) -> Self {
        self.snapshot_every = every;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn in_memory(mut self) -> Self {
        self.highscore_path = None;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_ms == 0 {
            return Err(KaosSnakeError::config("tick_ms must be positive"));
        }
        if self.snapshot_every == 0 {
            return Err(KaosSnakeError::config("snapshot_every must be positive"));
        }
        if self.initial_length == 0 {
            return Err(KaosSnakeError::config("initial_length must be positive"));
        }
        match self.special_policy {
            SpecialPolicy::Chance { probability } if !(0.0..=1.0).contains(&probability) => {
                return Err(KaosSnakeError::config("special probability must be within [0, 1]"));
            }
            SpecialPolicy::Every { count: 0 } => {
                return Err(KaosSnakeError::config("special every-count must be positive"));
            }
            _ => {}
        }
        // Slot A spawns at (len, 5) heading right, slot B at (w-1-len, h-6) heading left.
        let len = self.initial_length as i32;
        if self.grid_width < 2 * len + 2 || self.grid_height < 12 {
            return Err(KaosSnakeError::config(format!(
                "grid {}x{} too small for snakes of length {}",
                self.grid_width, self.grid_height, self.initial_length
            )));
        }
        Ok(())
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Number of running ticks in one round.
    pub fn round_ticks(&self) -> u64 {
        (self.round_secs * 1000).div_ceil(self.tick_ms)
    }

    pub fn special_ttl_ticks(&self) -> u64 {
        self.special_ttl_ms.div_ceil(self.tick_ms).max(1)
    }

    pub fn safety_start(&self) -> Duration {
        Duration::from_millis(self.safety_start_ms)
    }

    pub fn bot_fallback(&self) -> Duration {
        Duration::from_millis(self.bot_fallback_ms)
    }

    pub fn room_grace(&self) -> Duration {
        Duration::from_secs(self.room_grace_secs)
    }

    pub fn input_min_interval(&self) -> Duration {
        Duration::from_millis(self.input_min_interval_ms)
    }

    pub fn highscore_flush(&self) -> Duration {
        Duration::from_millis(self.highscore_flush_ms)
    }
}

fn env_u64(key: &str) -> Result<Option<u64>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| KaosSnakeError::config(format!("{key} must be an integer, got {raw:?}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = GameConfig::default();
        config.validate().unwrap();
        assert_eq!(config.round_ticks(), 3000);
        assert_eq!(config.special_ttl_ticks(), 100);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(GameConfig::default().with_tick_ms(0).validate().is_err());
        assert!(GameConfig::default().with_snapshot_every(0).validate().is_err());
        assert!(GameConfig::default().with_grid(8, 8).validate().is_err());
        assert!(GameConfig::default()
            .with_special_policy(SpecialPolicy::Chance { probability: 1.5 })
            .validate()
            .is_err());
        assert!(GameConfig::default()
            .with_special_policy(SpecialPolicy::Every { count: 0 })
            .validate()
            .is_err());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: GameConfig = serde_json::from_str(
            r#"{"tick_ms": 50, "special_policy": {"kind": "every", "count": 5}}"#,
        )
        .unwrap();
        assert_eq!(config.tick_ms, 50);
        assert_eq!(config.grid_width, 40);
        assert_eq!(config.special_policy, SpecialPolicy::Every { count: 5 });
        assert_eq!(config.round_ticks(), 6000);
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("game.json");
        std::fs::write(&path, r#"{"round_secs": 60, "highscore_path": null}"#).unwrap();

        let config = GameConfig::from_json_file(&path).unwrap();
        assert_eq!(config.round_secs, 60);
        assert!(config.highscore_path.is_none());
    }
}
