//! Match aggregate and tick engine.
//!
//! A [`Room`] is plain synchronous state: the arena wraps it in a mutex and
//! drives it from timers. Every method returns the messages it wants sent
//! as [`Outbound`] values so callers can deliver them after unlocking.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::bot;
use crate::config::{GameConfig, SpecialPolicy};
use crate::grid::{occupancy, Cell, Dir, Grid};
use crate::protocol::{ServerEvent, SnakeView, Snapshot, Winner};
use crate::session::SessionId;
use crate::snake::Snake;

pub type RoomId = String;

/// Display name of the AI opponent.
pub const BOT_NICK: &str = "Bot";

/// Contestant position. `A` is `p1` on the wire, `B` is `p2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Slot {
    #[serde(rename = "p1")]
    A,
    #[serde(rename = "p2")]
    B,
}

impl Slot {
    pub const BOTH: [Slot; 2] = [Slot::A, Slot::B];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Slot::A => 0,
            Slot::B => 1,
        }
    }

    #[inline]
    pub fn other(self) -> Slot {
        match self {
            Slot::A => Slot::B,
            Slot::B => Slot::A,
        }
    }
}

/// Room lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Countdown,
    Running,
    Over,
}

/// Final result of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Won(Slot),
    Draw,
}

impl Outcome {
    /// Higher score wins, equal scores draw.
    pub fn by_score(a: u32, b: u32) -> Outcome {
        match a.cmp(&b) {
            std::cmp::Ordering::Greater => Outcome::Won(Slot::A),
            std::cmp::Ordering::Less => Outcome::Won(Slot::B),
            std::cmp::Ordering::Equal => Outcome::Draw,
        }
    }
}

impl From<Outcome> for Winner {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Won(Slot::A) => Winner::P1,
            Outcome::Won(Slot::B) => Winner::P2,
            Outcome::Draw => Winner::Tie,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Controller {
    Human { session: SessionId, connected: bool },
    Bot,
}

/// A slot's controller plus its handshake flags.
#[derive(Debug, Clone)]
pub struct Seat {
    controller: Controller,
    nick: String,
    countdown_done: bool,
    rematch_ready: bool,
}

impl Seat {
    pub fn human(session: SessionId, nick: impl Into<String>) -> Self {
        Self {
            controller: Controller::Human {
                session,
                connected: true,
            },
            nick: nick.into(),
            countdown_done: false,
            rematch_ready: false,
        }
    }

    pub fn bot() -> Self {
        Self {
            controller: Controller::Bot,
            nick: BOT_NICK.to_string(),
            countdown_done: true,
            rematch_ready: true,
        }
    }

    pub fn nick(&self) -> &str {
        &self.nick
    }

    pub fn is_bot(&self) -> bool {
        matches!(self.controller, Controller::Bot)
    }

    pub fn session(&self) -> Option<SessionId> {
        match self.controller {
            Controller::Human { session, .. } => Some(session),
            Controller::Bot => None,
        }
    }

    /// Session of a human who is still attached.
    pub fn connected_session(&self) -> Option<SessionId> {
        match self.controller {
            Controller::Human {
                session,
                connected: true,
            } => Some(session),
            _ => None,
        }
    }

    /// Bots and departed humans never hold up a barrier.
    fn reset_flags(&mut self) {
        let absent = self.connected_session().is_none();
        self.countdown_done = absent;
        self.rematch_ready = absent;
    }
}

/// A message addressed to one session.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub to: SessionId,
    pub event: ServerEvent,
}

/// Result of one [`Room::tick`].
#[derive(Debug, Default)]
pub struct TickReport {
    pub events: Vec<Outbound>,
    /// The round ended during this tick.
    pub finished: bool,
    /// A pending rematch went ahead because the departing seat was the
    /// last one it waited on.
    pub restarted: bool,
}

/// Result of a rematch request.
#[derive(Debug, PartialEq)]
pub enum Rematch {
    /// Not applicable (round still live, requester detached).
    Ignored,
    /// Recorded, still waiting on the other human.
    Waiting(Vec<Outbound>),
    /// Everyone ready; a fresh countdown has begun.
    Restarted(Vec<Outbound>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SpecialFood {
    cell: Cell,
    expires_at: u64,
}

/// One two-contestant match.
pub struct Room {
    id: RoomId,
    config: Arc<GameConfig>,
    grid: Grid,
    phase: Phase,
    seats: [Seat; 2],
    snakes: [Snake; 2],
    food: Option<Cell>,
    special: Option<SpecialFood>,
    normal_eaten: u32,
    tick: u64,
    outcome: Option<Outcome>,
    scored: bool,
    generation: u64,
    rng: StdRng,
}

impl Room {
    /// Create a room in `Countdown`. A bot may only sit in slot B.
    pub fn new(id: RoomId, config: Arc<GameConfig>, a: Seat, b: Seat) -> Self {
        debug_assert!(!a.is_bot(), "bot must sit in slot B");
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let grid = Grid::new(config.grid_width, config.grid_height);
        let snakes = Self::spawn(&config);

        let mut room = Self {
            id,
            config,
            grid,
            phase: Phase::Countdown,
            seats: [a, b],
            snakes,
            food: None,
            special: None,
            normal_eaten: 0,
            tick: 0,
            outcome: None,
            scored: false,
            generation: 0,
            rng,
        };
        room.reset_round();
        room
    }

    fn spawn(config: &GameConfig) -> [Snake; 2] {
        let len = config.initial_length;
        let l = len as i32;
        [
            Snake::new(Cell::new(l, 5), Dir::Right, len),
            Snake::new(
                Cell::new(config.grid_width - 1 - l, config.grid_height - 6),
                Dir::Left,
                len,
            ),
        ]
    }

    fn reset_round(&mut self) {
        self.snakes = Self::spawn(&self.config);
        self.phase = Phase::Countdown;
        self.special = None;
        self.normal_eaten = 0;
        self.tick = 0;
        self.outcome = None;
        self.scored = false;
        for seat in &mut self.seats {
            seat.reset_flags();
        }
        self.food = self.free_cell(None);
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_live(&self) -> bool {
        self.phase != Phase::Over
    }

    /// Bumped on every rematch. Timers compare it before acting.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn is_bot_match(&self) -> bool {
        self.seats[1].is_bot()
    }

    pub fn seat(&self, slot: Slot) -> &Seat {
        &self.seats[slot.index()]
    }

    pub fn snake(&self, slot: Slot) -> &Snake {
        &self.snakes[slot.index()]
    }

    pub fn food(&self) -> Option<Cell> {
        self.food
    }

    pub fn special_food(&self) -> Option<Cell> {
        self.special.map(|s| s.cell)
    }

    pub fn slot_of(&self, session: SessionId) -> Option<Slot> {
        Slot::BOTH
            .into_iter()
            .find(|&slot| self.seat(slot).session() == Some(session))
    }

    /// Remaining round time in whole seconds.
    pub fn seconds_left(&self) -> u64 {
        let ticks = self.config.round_ticks().saturating_sub(self.tick);
        (ticks * self.config.tick_ms).div_ceil(1000)
    }

    /// Address `event` to every attached human.
    fn broadcast(&self, event: ServerEvent) -> Vec<Outbound> {
        self.seats
            .iter()
            .filter_map(Seat::connected_session)
            .map(|to| Outbound {
                to,
                event: event.clone(),
            })
            .collect()
    }

    /// Match-start notice for each attached human, carrying its own role.
    pub fn announce(&self) -> Vec<Outbound> {
        Slot::BOTH
            .into_iter()
            .filter_map(|slot| {
                self.seat(slot).connected_session().map(|to| Outbound {
                    to,
                    event: ServerEvent::MatchStart {
                        room: self.id.clone(),
                        role: slot,
                        duration: self.config.round_secs,
                        countdown: self.config.countdown_secs,
                        n1: self.seats[0].nick.clone(),
                        n2: self.seats[1].nick.clone(),
                    },
                })
            })
            .collect()
    }

    pub fn snapshot(&self) -> Snapshot {
        let view = |snake: &Snake| SnakeView {
            body: snake.body().iter().copied().collect(),
            score: snake.score(),
            stats: snake.stats(),
        };
        Snapshot {
            tick: self.tick,
            left: self.seconds_left(),
            food: self.food,
            sfood: self.special_food(),
            p1: view(&self.snakes[0]),
            p2: view(&self.snakes[1]),
            over: self.phase == Phase::Over,
            winner: self.outcome.map(Winner::from),
            n1: self.seats[0].nick.clone(),
            n2: self.seats[1].nick.clone(),
        }
    }

    /// Record countdown completion. Returns `true` if this satisfied the
    /// readiness barrier and the room is now running.
    pub fn countdown_done(&mut self, slot: Slot) -> bool {
        if self.phase != Phase::Countdown {
            return false;
        }
        self.seats[slot.index()].countdown_done = true;
        if self.seats.iter().all(|s| s.countdown_done) {
            self.phase = Phase::Running;
            return true;
        }
        false
    }

    /// Safety timer path. Returns `true` if the room transitioned.
    pub fn force_start(&mut self) -> bool {
        if self.phase != Phase::Countdown {
            return false;
        }
        self.phase = Phase::Running;
        true
    }

    /// Queue a direction for a human slot. Malformed and reversing vectors
    /// are ignored.
    pub fn queue_direction(&mut self, slot: Slot, dx: i32, dy: i32) -> bool {
        if self.phase != Phase::Running || self.seat(slot).is_bot() {
            return false;
        }
        match Dir::from_vector(dx, dy) {
            Some(dir) => self.snakes[slot.index()].queue_direction(dir),
            None => false,
        }
    }

    /// Advance the simulation by one step.
    pub fn tick(&mut self) -> TickReport {
        if self.phase != Phase::Running {
            return TickReport::default();
        }
        self.tick += 1;

        if self.is_bot_match() {
            let target = self.special_food().or(self.food);
            let dir = bot::decide(&self.grid, &self.snakes[1], &self.snakes[0], target);
            self.snakes[1].queue_direction(dir);
        }

        for snake in &mut self.snakes {
            snake.advance();
        }

        let dead_a = self.is_dead(Slot::A);
        let dead_b = self.is_dead(Slot::B);
        match (dead_a, dead_b) {
            (true, true) => self.finish(Outcome::Draw),
            (true, false) => self.finish(Outcome::Won(Slot::B)),
            (false, true) => self.finish(Outcome::Won(Slot::A)),
            (false, false) => {
                for slot in Slot::BOTH {
                    self.consume(slot);
                }
                self.expire_special();
                if self.tick >= self.config.round_ticks() {
                    let outcome =
                        Outcome::by_score(self.snakes[0].score(), self.snakes[1].score());
                    self.finish(outcome);
                }
            }
        }

        let finished = self.phase == Phase::Over;
        let events = if finished || self.tick % self.config.snapshot_every == 0 {
            self.broadcast(ServerEvent::State(self.snapshot()))
        } else {
            Vec::new()
        };
        TickReport {
            events,
            finished,
            restarted: false,
        }
    }

    fn is_dead(&self, slot: Slot) -> bool {
        let me = &self.snakes[slot.index()];
        let rival = &self.snakes[slot.other().index()];
        let head = me.head();
        !self.grid.contains(head) || me.bites_itself() || rival.contains(head)
    }

    fn consume(&mut self, slot: Slot) {
        let head = self.snakes[slot.index()].head();
        if self.food == Some(head) {
            self.snakes[slot.index()].eat_normal();
            self.normal_eaten += 1;
            self.food = self.free_cell(self.special_food());
            self.maybe_spawn_special();
        } else if self.special_food() == Some(head) {
            self.snakes[slot.index()].eat_special(self.config.special_bonus);
            self.special = None;
        }
    }

    fn maybe_spawn_special(&mut self) {
        if self.special.is_some() {
            return;
        }
        let spawn = match self.config.special_policy {
            SpecialPolicy::Chance { probability } => self.rng.gen_bool(probability),
            SpecialPolicy::Every { count } => self.normal_eaten % count == 0,
        };
        if !spawn {
            return;
        }
        if let Some(cell) = self.free_cell(self.food) {
            self.special = Some(SpecialFood {
                cell,
                expires_at: self.tick + self.config.special_ttl_ticks(),
            });
        }
    }

    fn expire_special(&mut self) {
        if self.special.is_some_and(|s| self.tick >= s.expires_at) {
            self.special = None;
        }
    }

    /// Random cell outside both bodies and `also_avoid`.
    fn free_cell(&mut self, also_avoid: Option<Cell>) -> Option<Cell> {
        let mut occupied = occupancy([self.snakes[0].body(), self.snakes[1].body()]);
        occupied.extend(also_avoid);
        self.grid.random_empty(&occupied, &mut self.rng)
    }

    fn finish(&mut self, outcome: Outcome) {
        self.phase = Phase::Over;
        self.outcome = Some(outcome);
        tracing::info!(
            room = %self.id,
            outcome = ?outcome,
            p1 = self.snakes[0].score(),
            p2 = self.snakes[1].score(),
            ticks = self.tick,
            "match finished"
        );
    }

    /// A human leaves (disconnect or find-new). A live round is forfeited
    /// to the other slot and the terminal snapshot returned. After `over`
    /// the departure may release a rematch the remaining human asked for.
    pub fn depart(&mut self, slot: Slot) -> TickReport {
        if let Controller::Human { connected, .. } = &mut self.seats[slot.index()].controller {
            *connected = false;
        }
        if !self.is_live() {
            let waiting = self
                .seats
                .iter()
                .any(|s| s.connected_session().is_some() && s.rematch_ready);
            if waiting && self.rematch_settled() {
                return TickReport {
                    events: self.restart(),
                    finished: false,
                    restarted: true,
                };
            }
            return TickReport::default();
        }
        tracing::info!(room = %self.id, slot = ?slot, "forfeit");
        self.finish(Outcome::Won(slot.other()));
        TickReport {
            events: self.broadcast(ServerEvent::State(self.snapshot())),
            finished: true,
            restarted: false,
        }
    }

    /// Rematch handshake. Only meaningful once the round is over. The
    /// round restarts once every attached human has signalled; bots and
    /// departed humans count as ready.
    pub fn rematch(&mut self, slot: Slot) -> Rematch {
        if self.phase != Phase::Over || self.seat(slot).connected_session().is_none() {
            return Rematch::Ignored;
        }

        self.seats[slot.index()].rematch_ready = true;
        if self.rematch_settled() {
            return Rematch::Restarted(self.restart());
        }

        Rematch::Waiting(self.broadcast(ServerEvent::RematchWait {
            p1: self.seats[0].rematch_ready,
            p2: self.seats[1].rematch_ready,
        }))
    }

    fn rematch_settled(&self) -> bool {
        self.seats
            .iter()
            .all(|s| s.rematch_ready || s.connected_session().is_none())
    }

    fn restart(&mut self) -> Vec<Outbound> {
        self.generation += 1;
        self.reset_round();
        tracing::info!(room = %self.id, generation = self.generation, "rematch");
        self.announce()
    }

    /// Leaderboard entries for a finished round, at most once per round.
    /// Bot slots never produce an entry.
    pub fn take_highscores(&mut self) -> Vec<(String, u32)> {
        let Some(outcome) = self.outcome else {
            return Vec::new();
        };
        if self.scored {
            return Vec::new();
        }
        self.scored = true;

        let slots: &[Slot] = match outcome {
            Outcome::Won(Slot::A) => &[Slot::A],
            Outcome::Won(Slot::B) => &[Slot::B],
            Outcome::Draw => &Slot::BOTH,
        };
        slots
            .iter()
            .filter(|&&slot| !self.seat(slot).is_bot())
            .map(|&slot| (self.seat(slot).nick.clone(), self.snake(slot).score()))
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn set_food(&mut self, cell: Cell) {
        self.food = Some(cell);
    }

    #[cfg(test)]
    pub(crate) fn set_special(&mut self, cell: Cell) {
        self.special = Some(SpecialFood {
            cell,
            expires_at: self.tick + self.config.special_ttl_ticks(),
        });
    }

    #[cfg(test)]
    pub(crate) fn set_snake(&mut self, slot: Slot, snake: Snake) {
        self.snakes[slot.index()] = snake;
    }
}
