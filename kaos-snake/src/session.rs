//! Session and identity registry.
//!
//! One [`Session`] per connection. Nicknames are claimed per network origin:
//! a nickname held by one origin can't be taken by another, while any number
//! of sessions from the holding origin may share it. The claim is released
//! when its last holder goes away.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::config::GameConfig;
use crate::error::NickError;
use crate::matchmaker::TicketId;
use crate::protocol::ServerEvent;
use crate::room::{RoomId, BOT_NICK};

pub type SessionId = u64;

static SESSION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generate unique session ID
#[inline]
pub fn generate_session_id() -> SessionId {
    SESSION_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Client session
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub origin: IpAddr,
    pub nick: Option<String>,
    pub room: Option<RoomId>,
    pub ticket: Option<TicketId>,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl Session {
    /// Queue an event for the connection. `false` once the receiver is gone.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

#[derive(Debug)]
struct NickClaim {
    origin: IpAddr,
    holders: HashSet<SessionId>,
}

/// Session registry
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Session>,
    /// Lowercased nickname -> claim.
    nicks: Mutex<HashMap<String, NickClaim>>,
    nick_max_len: usize,
    banned_words: Vec<String>,
}

impl SessionRegistry {
    pub fn new(nick_max_len: usize, banned_words: &[String]) -> Self {
        Self {
            sessions: DashMap::new(),
            nicks: Mutex::new(HashMap::new()),
            nick_max_len,
            banned_words: banned_words.iter().map(|w| w.to_lowercase()).collect(),
        }
    }

    pub fn from_config(config: &GameConfig) -> Self {
        Self::new(config.nick_max_len, &config.banned_words)
    }

    pub fn create(&self, origin: IpAddr) -> (SessionId, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = generate_session_id();
        self.sessions.insert(
            id,
            Session {
                id,
                origin,
                nick: None,
                room: None,
                ticket: None,
                tx,
            },
        );
        (id, rx)
    }

    pub fn get(&self, id: SessionId) -> Option<dashmap::mapref::one::Ref<'_, SessionId, Session>> {
        self.sessions.get(&id)
    }

    pub fn get_mut(
        &self,
        id: SessionId,
    ) -> Option<dashmap::mapref::one::RefMut<'_, SessionId, Session>> {
        self.sessions.get_mut(&id)
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Drop a session and release its nickname claim.
    pub fn remove(&self, id: SessionId) -> Option<Session> {
        let (_, session) = self.sessions.remove(&id)?;
        if let Some(nick) = &session.nick {
            self.release(&nick.to_lowercase(), id);
        }
        Some(session)
    }

    pub fn send(&self, id: SessionId, event: ServerEvent) -> bool {
        self.sessions.get(&id).is_some_and(|s| s.send(event))
    }

    pub fn nick(&self, id: SessionId) -> Option<String> {
        self.sessions.get(&id).and_then(|s| s.nick.clone())
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Origin currently holding `nick`, if any.
    pub fn nick_holder(&self, nick: &str) -> Option<IpAddr> {
        self.nicks
            .lock()
            .get(&nick.trim().to_lowercase())
            .map(|claim| claim.origin)
    }

    /// Normalise and check a raw nickname without claiming it.
    pub fn validate_nick(&self, raw: &str) -> Result<String, NickError> {
        let nick = raw.trim();
        if nick.is_empty() {
            return Err(NickError::Empty);
        }
        if nick.chars().count() > self.nick_max_len {
            return Err(NickError::TooLong {
                max: self.nick_max_len,
            });
        }
        let lower = nick.to_lowercase();
        if self.banned_words.iter().any(|w| lower.contains(w.as_str())) {
            return Err(NickError::Banned);
        }
        if lower == BOT_NICK.to_lowercase() {
            return Err(NickError::Reserved);
        }
        Ok(nick.to_string())
    }

    /// Claim `raw` for session `id`, replacing whatever it held before.
    pub fn register_nick(&self, id: SessionId, raw: &str) -> Result<String, NickError> {
        let nick = self.validate_nick(raw)?;
        let key = nick.to_lowercase();

        let mut nicks = self.nicks.lock();
        let Some(mut session) = self.sessions.get_mut(&id) else {
            return Err(NickError::Taken);
        };

        if let Some(claim) = nicks.get(&key) {
            if claim.origin != session.origin && !claim.holders.is_empty() {
                return Err(NickError::Taken);
            }
        }

        let previous = session.nick.replace(nick.clone());
        let origin = session.origin;
        drop(session);

        if let Some(prev) = previous.map(|p| p.to_lowercase()) {
            if prev != key {
                Self::release_locked(&mut nicks, &prev, id);
            }
        }

        nicks
            .entry(key)
            .or_insert_with(|| NickClaim {
                origin,
                holders: HashSet::new(),
            })
            .holders
            .insert(id);

        Ok(nick)
    }

    /// Forget the session's nickname.
    pub fn reset_nick(&self, id: SessionId) {
        let previous = self.sessions.get_mut(&id).and_then(|mut s| s.nick.take());
        if let Some(nick) = previous {
            self.release(&nick.to_lowercase(), id);
        }
    }

    fn release(&self, key: &str, id: SessionId) {
        Self::release_locked(&mut self.nicks.lock(), key, id);
    }

    fn release_locked(nicks: &mut HashMap<String, NickClaim>, key: &str, id: SessionId) {
        if let Some(claim) = nicks.get_mut(key) {
            claim.holders.remove(&id);
            if claim.holders.is_empty() {
                nicks.remove(key);
            }
        }
    }
}
