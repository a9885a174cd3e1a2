//! Per-session input rate limiting.
//!
//! A minimum-interval limiter: a message is allowed if at least
//! `min_interval` has passed since the last *allowed* message from the same
//! session. Excess messages are dropped by the caller, never queued.
//!
//! Uses `tokio::time::Instant` so paused-clock tests stay deterministic.

use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::session::SessionId;

/// Minimum-interval rate limiter keyed by session.
pub struct RateLimiter {
    min_interval: Duration,
    last_allowed: DashMap<SessionId, Instant>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_allowed: DashMap::new(),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Check if a message from `session` is allowed right now.
    pub fn check(&self, session: SessionId) -> bool {
        self.check_at(session, Instant::now())
    }

    /// Same as [`check`](Self::check) with an explicit clock reading.
    pub fn check_at(&self, session: SessionId, now: Instant) -> bool {
        match self.last_allowed.entry(session) {
            Entry::Occupied(mut last) => {
                if now.saturating_duration_since(*last.get()) >= self.min_interval {
                    last.insert(now);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
        }
    }

    /// Drop the state of a departed session.
    pub fn forget(&self, session: SessionId) {
        self.last_allowed.remove(&session);
    }

    /// Get number of tracked clients
    pub fn client_count(&self) -> usize {
        self.last_allowed.len()
    }
}
