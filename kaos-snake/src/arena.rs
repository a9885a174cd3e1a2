//! Async orchestration.
//!
//! The [`Arena`] routes client events to rooms and owns every timer:
//!
//! | timer    | owner        | armed on              | superseded by                |
//! |----------|--------------|-----------------------|------------------------------|
//! | fallback | queue ticket | parking in the queue  | pairing, cancel, disconnect  |
//! | safety   | room         | match start / rematch | readiness barrier, forfeit   |
//! | ticker   | room         | `running`             | `over`                       |
//! | gc       | room         | `over`                | rematch, room emptied        |
//!
//! Superseded timers are aborted, and each timer re-checks its ticket or
//! the room generation when it fires, so a late wakeup does nothing.
//!
//! Lock order is room, then its timers. Session refs are never held while
//! a room is locked and outbound messages go out after the room unlocks.

use std::net::IpAddr;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::config::GameConfig;
use crate::error::{NickError, Result};
use crate::leaderboard::{HighscoreEntry, ScoreBoard};
use crate::matchmaker::{Enqueued, Matchmaker, MatchmakerError, TicketId};
use crate::protocol::{ClientEvent, ServerEvent, Snapshot};
use crate::ratelimit::RateLimiter;
use crate::room::{Outbound, Phase, Rematch, Room, RoomId, Seat, Slot};
use crate::session::{SessionId, SessionRegistry};

/// A room plus the timers it owns.
pub struct RoomHandle {
    id: RoomId,
    room: Mutex<Room>,
    timers: Mutex<RoomTimers>,
}

#[derive(Default)]
struct RoomTimers {
    safety: Option<AbortHandle>,
    ticker: Option<AbortHandle>,
    gc: Option<AbortHandle>,
}

impl RoomTimers {
    fn set(slot: &mut Option<AbortHandle>, timer: AbortHandle) {
        if let Some(old) = slot.replace(timer) {
            old.abort();
        }
    }

    fn cancel(slot: &mut Option<AbortHandle>) {
        if let Some(timer) = slot.take() {
            timer.abort();
        }
    }

    fn cancel_all(&mut self) {
        Self::cancel(&mut self.safety);
        Self::cancel(&mut self.ticker);
        Self::cancel(&mut self.gc);
    }
}

impl RoomHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run `f` against the locked room.
    pub fn with<R>(&self, f: impl FnOnce(&Room) -> R) -> R {
        f(&self.room.lock())
    }
}

/// Game server core.
pub struct Arena {
    config: Arc<GameConfig>,
    sessions: SessionRegistry,
    matchmaker: Matchmaker,
    rooms: DashMap<RoomId, Arc<RoomHandle>>,
    limiter: RateLimiter,
    scores: Arc<dyn ScoreBoard>,
}

impl Arena {
    /// Build an arena. Fails if `config` doesn't validate.
    pub fn new(config: GameConfig, scores: Arc<dyn ScoreBoard>) -> Result<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(Self {
            sessions: SessionRegistry::from_config(&config),
            matchmaker: Matchmaker::new(),
            rooms: DashMap::new(),
            limiter: RateLimiter::new(config.input_min_interval()),
            scores,
            config: Arc::new(config),
        }))
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Sessions waiting in the matchmaking queue.
    pub fn queued(&self) -> usize {
        self.matchmaker.len()
    }

    pub fn is_queued(&self, session: SessionId) -> bool {
        self.matchmaker.is_queued(session)
    }

    pub fn leaderboard(&self, limit: usize) -> Vec<HighscoreEntry> {
        self.scores.top(limit)
    }

    pub fn room(&self, id: &str) -> Option<Arc<RoomHandle>> {
        self.rooms.get(id).map(|r| Arc::clone(r.value()))
    }

    /// Room the session is currently seated in.
    pub fn room_of(&self, session: SessionId) -> Option<Arc<RoomHandle>> {
        let id = self.sessions.get(session)?.room.clone()?;
        self.room(&id)
    }

    pub fn snapshot(&self, room: &str) -> Option<Snapshot> {
        self.room(room).map(|h| h.with(Room::snapshot))
    }

    /// Register a new connection.
    pub fn connect(&self, origin: IpAddr) -> (SessionId, mpsc::UnboundedReceiver<ServerEvent>) {
        let (id, rx) = self.sessions.create(origin);
        tracing::debug!(session = id, %origin, "connected");
        (id, rx)
    }

    /// Handle one inbound client event.
    pub fn handle(self: &Arc<Self>, session: SessionId, event: ClientEvent) {
        if !self.sessions.contains(session) {
            tracing::debug!(session, "event for unknown session");
            return;
        }
        match event {
            ClientEvent::SetNick { nick } => self.register(session, &nick),
            ClientEvent::CountdownDone => self.countdown_done(session),
            ClientEvent::Input { dx, dy } => {
                if !self.limiter.check(session) {
                    tracing::trace!(session, "input dropped by rate limit");
                    return;
                }
                self.input(session, dx, dy);
            }
            ClientEvent::Rematch => self.rematch(session),
            ClientEvent::FindNew => self.find_new(session),
        }
    }

    /// Connection closed: release the nickname, cancel queueing, forfeit.
    ///
    /// The session record goes first. A room created concurrently either
    /// bound the session before removal, so the record names the room, or
    /// finds it gone and vacates the seat itself.
    pub fn disconnect(self: &Arc<Self>, session: SessionId) {
        let Some(removed) = self.sessions.remove(session) else {
            return;
        };
        tracing::debug!(session, nick = ?removed.nick, "disconnected");
        if self.matchmaker.cancel(session) {
            tracing::debug!(session, "left queue");
        }
        self.limiter.forget(session);
        if let Some(handle) = removed.room.as_deref().and_then(|id| self.room(id)) {
            self.vacate(&handle, session);
        }
    }

    fn register(self: &Arc<Self>, session: SessionId, raw: &str) {
        let playing = self.matchmaker.is_queued(session)
            || self.room_of(session).is_some_and(|h| h.with(Room::is_live));
        let result = if playing {
            Err(NickError::AlreadyPlaying)
        } else {
            self.sessions.register_nick(session, raw)
        };

        match result {
            Ok(nick) => {
                self.sessions.send(session, ServerEvent::NickAccepted { nick });
                self.leave_room(session);
                self.enqueue(session);
            }
            Err(e) => {
                tracing::debug!(session, reason = %e, "nickname rejected");
                self.sessions.send(
                    session,
                    ServerEvent::NickError {
                        reason: e.to_string(),
                    },
                );
            }
        }
    }

    fn enqueue(self: &Arc<Self>, session: SessionId) {
        match self.matchmaker.enqueue(session) {
            Ok(Enqueued::Paired { partner }) => {
                self.clear_ticket(partner);
                self.create_room(partner, Some(session));
            }
            Ok(Enqueued::Waiting(ticket)) => {
                if let Some(mut s) = self.sessions.get_mut(session) {
                    s.ticket = Some(ticket);
                }
                let arena = Arc::clone(self);
                let delay = self.config.bot_fallback();
                let timer = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    arena.fallback(ticket);
                });
                self.matchmaker.arm(ticket, timer.abort_handle());
                tracing::debug!(session, ticket, "queued");
            }
            Err(MatchmakerError::AlreadyQueued(_)) => {
                tracing::debug!(session, "already queued");
            }
        }
    }

    fn fallback(self: &Arc<Self>, ticket: TicketId) {
        let Some(session) = self.matchmaker.take(ticket) else {
            return;
        };
        self.clear_ticket(session);
        if self.sessions.contains(session) {
            self.create_room(session, None);
        }
    }

    fn clear_ticket(&self, session: SessionId) {
        if let Some(mut s) = self.sessions.get_mut(session) {
            s.ticket = None;
        }
    }

    /// Seat `a` in slot A and `b` (or a bot) in slot B.
    fn create_room(self: &Arc<Self>, a: SessionId, b: Option<SessionId>) {
        let id = Uuid::new_v4().to_string();
        let nick_a = self.sessions.nick(a).unwrap_or_else(|| "Player 1".to_string());
        let seat_b = match b {
            Some(b) => Seat::human(b, self.sessions.nick(b).unwrap_or_else(|| "Player 2".to_string())),
            None => Seat::bot(),
        };
        let room = Room::new(id.clone(), Arc::clone(&self.config), Seat::human(a, nick_a), seat_b);
        let events = room.announce();

        let handle = Arc::new(RoomHandle {
            id: id.clone(),
            room: Mutex::new(room),
            timers: Mutex::new(RoomTimers::default()),
        });
        self.rooms.insert(id.clone(), Arc::clone(&handle));
        tracing::info!(room = %id, bot = b.is_none(), "match created");

        // Bind after the insert so a disconnect that wins the race finds the room.
        let gone: Vec<SessionId> = std::iter::once(a)
            .chain(b)
            .filter(|&session| match self.sessions.get_mut(session) {
                Some(mut s) => {
                    s.room = Some(id.clone());
                    false
                }
                None => true,
            })
            .collect();

        self.arm_safety(&handle, 0);
        self.deliver(events);
        for session in gone {
            tracing::debug!(room = %id, session, "seat vacated before binding");
            self.vacate(&handle, session);
        }
    }

    fn arm_safety(self: &Arc<Self>, handle: &Arc<RoomHandle>, generation: u64) {
        let arena = Arc::clone(self);
        let target = Arc::clone(handle);
        let delay = self.config.safety_start();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            arena.safety_fired(&target, generation);
        });
        RoomTimers::set(&mut handle.timers.lock().safety, timer.abort_handle());
    }

    fn safety_fired(self: &Arc<Self>, handle: &Arc<RoomHandle>, generation: u64) {
        let mut room = handle.room.lock();
        if room.generation() != generation || !room.force_start() {
            return;
        }
        tracing::info!(room = %handle.id, "started by safety timer");
        let mut timers = handle.timers.lock();
        timers.safety = None;
        self.start_ticker(handle, &mut timers, generation);
    }

    fn countdown_done(self: &Arc<Self>, session: SessionId) {
        let Some(handle) = self.room_of(session) else {
            return;
        };
        let mut room = handle.room.lock();
        let Some(slot) = room.slot_of(session) else {
            return;
        };
        if room.countdown_done(slot) {
            tracing::info!(room = %handle.id, "readiness barrier satisfied");
            let generation = room.generation();
            let mut timers = handle.timers.lock();
            RoomTimers::cancel(&mut timers.safety);
            self.start_ticker(&handle, &mut timers, generation);
        }
    }

    /// Spawn the tick loop for a room that just entered `running`.
    fn start_ticker(self: &Arc<Self>, handle: &Arc<RoomHandle>, timers: &mut RoomTimers, generation: u64) {
        let arena = Arc::clone(self);
        let target = Arc::clone(handle);
        let period = self.config.tick_period();
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let (events, finished) = {
                    let mut room = target.room.lock();
                    if room.generation() != generation || room.phase() != Phase::Running {
                        break;
                    }
                    let report = room.tick();
                    if report.finished {
                        arena.finish(&target, &mut room);
                    }
                    (report.events, report.finished)
                };
                arena.deliver(events);
                if finished {
                    break;
                }
            }
        });
        RoomTimers::set(&mut timers.ticker, task.abort_handle());
    }

    /// Bookkeeping for a room that just reached `over`. Called with the room
    /// locked.
    fn finish(self: &Arc<Self>, handle: &Arc<RoomHandle>, room: &mut Room) {
        for (nick, score) in room.take_highscores() {
            let rank = self.scores.submit(&nick, score);
            tracing::info!(room = %handle.id, %nick, score, ?rank, "highscore recorded");
        }

        let mut timers = handle.timers.lock();
        RoomTimers::cancel(&mut timers.safety);
        RoomTimers::cancel(&mut timers.ticker);

        let arena = Arc::clone(self);
        let id = handle.id.clone();
        let generation = room.generation();
        let grace = self.config.room_grace();
        let gc = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            arena.collect(&id, generation);
        });
        RoomTimers::set(&mut timers.gc, gc.abort_handle());
    }

    fn collect(&self, id: &str, generation: u64) {
        let Some(handle) = self.room(id) else {
            return;
        };
        let sessions: Vec<SessionId> = {
            let room = handle.room.lock();
            if room.generation() != generation || room.is_live() {
                return;
            }
            Slot::BOTH
                .into_iter()
                .filter_map(|slot| room.seat(slot).session())
                .collect()
        };
        self.drop_room(&handle, &sessions);
        tracing::info!(room = %id, "room collected");
    }

    fn drop_room(&self, handle: &Arc<RoomHandle>, sessions: &[SessionId]) {
        handle.timers.lock().cancel_all();
        self.rooms.remove(&handle.id);
        for &session in sessions {
            if let Some(mut s) = self.sessions.get_mut(session) {
                if s.room.as_deref() == Some(handle.id.as_str()) {
                    s.room = None;
                }
            }
        }
    }

    fn input(&self, session: SessionId, dx: i32, dy: i32) {
        let Some(handle) = self.room_of(session) else {
            return;
        };
        let mut room = handle.room.lock();
        if let Some(slot) = room.slot_of(session) {
            room.queue_direction(slot, dx, dy);
        }
    }

    fn rematch(self: &Arc<Self>, session: SessionId) {
        let Some(handle) = self.room_of(session) else {
            return;
        };
        let events = {
            let mut room = handle.room.lock();
            let Some(slot) = room.slot_of(session) else {
                return;
            };
            let result = room.rematch(slot);
            match result {
                Rematch::Ignored => {
                    tracing::debug!(room = %handle.id, session, "rematch ignored");
                    return;
                }
                Rematch::Waiting(events) => events,
                Rematch::Restarted(events) => {
                    let generation = room.generation();
                    RoomTimers::cancel(&mut handle.timers.lock().gc);
                    drop(room);
                    self.arm_safety(&handle, generation);
                    events
                }
            }
        };
        self.deliver(events);
    }

    fn find_new(self: &Arc<Self>, session: SessionId) {
        if self.matchmaker.is_queued(session) {
            return;
        }
        self.leave_room(session);
        self.enqueue(session);
    }

    /// Detach `session` from its room, forfeiting a live round.
    fn leave_room(self: &Arc<Self>, session: SessionId) {
        let room_id = self.sessions.get_mut(session).and_then(|mut s| s.room.take());
        if let Some(handle) = room_id.and_then(|id| self.room(&id)) {
            self.vacate(&handle, session);
        }
    }

    /// Mark the seat of `session` departed. Finishes a live round, restarts
    /// a rematch that only waited on this seat, and drops the room once no
    /// attached human remains.
    fn vacate(self: &Arc<Self>, handle: &Arc<RoomHandle>, session: SessionId) {
        let (events, restarted, abandoned, sessions) = {
            let mut room = handle.room.lock();
            let Some(slot) = room.slot_of(session) else {
                return;
            };
            let report = room.depart(slot);
            if report.finished {
                self.finish(handle, &mut room);
            }
            let restarted = report.restarted.then(|| room.generation());
            if restarted.is_some() {
                RoomTimers::cancel(&mut handle.timers.lock().gc);
            }
            let abandoned = Slot::BOTH
                .into_iter()
                .all(|slot| room.seat(slot).connected_session().is_none());
            let sessions: Vec<SessionId> = Slot::BOTH
                .into_iter()
                .filter_map(|slot| room.seat(slot).session())
                .collect();
            (report.events, restarted, abandoned, sessions)
        };

        self.deliver(events);
        if abandoned {
            self.drop_room(handle, &sessions);
            tracing::info!(room = %handle.id, "room abandoned");
        } else if let Some(generation) = restarted {
            self.arm_safety(handle, generation);
        }
    }

    fn deliver(&self, events: Vec<Outbound>) {
        for Outbound { to, event } in events {
            self.sessions.send(to, event);
        }
    }
}
