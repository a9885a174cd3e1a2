//! Integration tests for the arena: queueing, timers, forfeits, rematch.
//!
//! All tests run on a paused clock, so `sleep` jumps straight to the next
//! timer and every scenario is deterministic.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use kaos_snake::{
    Arena, ClientEvent, GameConfig, Highscores, Outcome, Phase, ScoreBoard, ServerEvent, SessionId,
    Slot, Snapshot, Winner,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::sleep;

/// Test bot fallback after the queue delay
#[tokio::test(start_paused = true)]
async fn test_bot_fallback() {
    let (arena, _) = arena(config());
    let (alice, mut rx) = join(&arena, 1, "alice");

    assert!(matches!(&drain(&mut rx)[..], [ServerEvent::NickAccepted { .. }]));
    assert!(arena.is_queued(alice));

    sleep(ms(1499)).await;
    assert!(arena.is_queued(alice));
    assert_eq!(arena.room_count(), 0);

    sleep(ms(2)).await;
    assert!(!arena.is_queued(alice));
    assert_eq!(arena.queued(), 0);
    assert_eq!(arena.room_count(), 1);

    let events = drain(&mut rx);
    let [ServerEvent::MatchStart { role, n1, n2, duration, countdown, .. }] = &events[..] else {
        panic!("expected match_start, got {events:?}");
    };
    assert_eq!(*role, Slot::A);
    assert_eq!(n1, "alice");
    assert_eq!(n2, "Bot");
    assert_eq!(*duration, 300);
    assert_eq!(*countdown, 3);

    let room = arena.room_of(alice).unwrap();
    assert!(room.with(|r| r.is_bot_match() && r.seat(Slot::B).is_bot()));
}

/// Test two humans pair at once and no bot shows up later
#[tokio::test(start_paused = true)]
async fn test_two_humans_pair() {
    let (arena, _) = arena(config());
    let (alice, mut rx_a) = join(&arena, 1, "alice");
    let (bob, mut rx_b) = join(&arena, 2, "bob");

    assert_eq!(arena.queued(), 0);
    assert_eq!(arena.room_count(), 1);

    let start_a = last_match_start(&mut rx_a);
    let start_b = last_match_start(&mut rx_b);
    assert_eq!(start_a, (Slot::A, "alice".to_string(), "bob".to_string()));
    assert_eq!(start_b, (Slot::B, "alice".to_string(), "bob".to_string()));

    let room = arena.room_of(alice).unwrap();
    assert_eq!(arena.room_of(bob).unwrap().id(), room.id());
    assert!(!room.with(|r| r.is_bot_match()));

    sleep(ms(2000)).await;
    assert_eq!(arena.room_count(), 1);
}

/// Test readiness barrier starts the round before the safety timer
#[tokio::test(start_paused = true)]
async fn test_barrier_before_safety_timer() {
    let (arena, _) = arena(config());
    let (alice, _rx_a) = join(&arena, 1, "alice");
    let (bob, mut rx_b) = join(&arena, 2, "bob");
    let room = arena.room_of(alice).unwrap();

    sleep(ms(500)).await;
    arena.handle(alice, ClientEvent::CountdownDone);
    assert_eq!(room.with(|r| r.phase()), Phase::Countdown);
    arena.handle(bob, ClientEvent::CountdownDone);
    assert_eq!(room.with(|r| r.phase()), Phase::Running);

    drain(&mut rx_b);
    sleep(ms(150)).await;
    let snapshot = last_state(&mut rx_b).expect("one tick");
    assert_eq!(snapshot.tick, 1);
    assert_eq!(snapshot.p1.body[0], kaos_snake::Cell::new(6, 5));
}

/// Test safety timer forces the start when a client never reports
#[tokio::test(start_paused = true)]
async fn test_safety_timer_forces_start() {
    let (arena, _) = arena(config());
    let (alice, _rx_a) = join(&arena, 1, "alice");
    let (_bob, _rx_b) = join(&arena, 2, "bob");
    let room = arena.room_of(alice).unwrap();

    arena.handle(alice, ClientEvent::CountdownDone);
    sleep(ms(3999)).await;
    assert_eq!(room.with(|r| r.phase()), Phase::Countdown);

    sleep(ms(2)).await;
    assert_eq!(room.with(|r| r.phase()), Phase::Running);
    assert_eq!(room.with(|r| r.tick_count()), 0);

    sleep(ms(100)).await;
    assert_eq!(room.with(|r| r.tick_count()), 1);
}

/// Test disconnect during a round forfeits to the other side
#[tokio::test(start_paused = true)]
async fn test_disconnect_forfeits() {
    let (arena, scores) = arena(config());
    let (alice, mut rx_a) = join(&arena, 1, "alice");
    let (bob, _rx_b) = join(&arena, 2, "bob");
    start(&arena, &[alice, bob]);
    let room = arena.room_of(alice).unwrap();

    sleep(ms(250)).await;
    arena.disconnect(bob);

    assert_eq!(room.with(|r| r.outcome()), Some(Outcome::Won(Slot::A)));
    let terminal = last_state(&mut rx_a).unwrap();
    assert!(terminal.over);
    assert_eq!(terminal.winner, Some(Winner::P1));

    let board = scores.top(10);
    assert_eq!(board.len(), 1);
    assert_eq!(board[0].nick, "alice");

    // The ticker is gone: no more states for alice.
    sleep(ms(500)).await;
    assert!(last_state(&mut rx_a).is_none());
    assert_eq!(arena.sessions().count(), 1);
}

/// Test disconnect while queued cancels the fallback
#[tokio::test(start_paused = true)]
async fn test_disconnect_while_queued() {
    let (arena, _) = arena(config());
    let (alice, _rx) = join(&arena, 1, "alice");
    arena.disconnect(alice);

    assert_eq!(arena.queued(), 0);
    sleep(ms(3000)).await;
    assert_eq!(arena.room_count(), 0);
}

/// Test find_new forfeits the live round and queues again
#[tokio::test(start_paused = true)]
async fn test_find_new_forfeits_and_requeues() {
    let (arena, _) = arena(config());
    let (alice, _rx_a) = join(&arena, 1, "alice");
    let (bob, _rx_b) = join(&arena, 2, "bob");
    start(&arena, &[alice, bob]);
    let room = arena.room_of(alice).unwrap();

    arena.handle(alice, ClientEvent::FindNew);
    assert_eq!(room.with(|r| r.outcome()), Some(Outcome::Won(Slot::B)));
    assert!(arena.is_queued(alice));
    assert!(arena.room_of(alice).is_none());

    // Nobody else is waiting, so the bot picks alice up.
    sleep(ms(1600)).await;
    let next = arena.room_of(alice).unwrap();
    assert_ne!(next.id(), room.id());
    assert!(next.with(|r| r.is_bot_match()));
}

/// Test nickname uniqueness across origins
#[tokio::test(start_paused = true)]
async fn test_nickname_unique_across_origins() {
    let (arena, _) = arena(config());
    let (_alice, _rx_a) = join(&arena, 1, "alice");

    let (other, mut rx_other) = arena.connect(ip(2));
    arena.handle(other, set_nick("ALICE"));
    assert_eq!(
        drain(&mut rx_other),
        vec![ServerEvent::NickError {
            reason: "nickname is already in use".into()
        }]
    );
    assert!(!arena.is_queued(other));

    let (again, mut rx_again) = arena.connect(ip(1));
    arena.handle(again, set_nick("alice"));
    assert!(matches!(
        drain(&mut rx_again).first(),
        Some(ServerEvent::NickAccepted { .. })
    ));
}

/// Test registering again while queued is refused
#[tokio::test(start_paused = true)]
async fn test_register_while_queued() {
    let (arena, _) = arena(config());
    let (alice, mut rx) = join(&arena, 1, "alice");
    drain(&mut rx);

    arena.handle(alice, set_nick("alicia"));
    assert_eq!(
        drain(&mut rx),
        vec![ServerEvent::NickError {
            reason: "already queued or in a match".into()
        }]
    );
    assert_eq!(arena.sessions().nick(alice).as_deref(), Some("alice"));
}

/// Test input flood: only the first input inside the interval counts
#[tokio::test(start_paused = true)]
async fn test_input_rate_limited() {
    let (arena, _) = arena(config());
    let (alice, _rx_a) = join(&arena, 1, "alice");
    let (bob, _rx_b) = join(&arena, 2, "bob");
    start(&arena, &[alice, bob]);
    let room = arena.room_of(alice).unwrap();

    arena.handle(alice, ClientEvent::Input { dx: 0, dy: -1 });
    arena.handle(alice, ClientEvent::Input { dx: 0, dy: 1 });
    sleep(ms(110)).await;

    assert_eq!(
        room.with(|r| r.snake(Slot::A).head()),
        kaos_snake::Cell::new(5, 4)
    );
}

/// Test round time budget and leaderboard eligibility
#[tokio::test(start_paused = true)]
async fn test_round_ends_on_time() {
    let (arena, scores) = arena(config().with_round_secs(1));
    let (alice, mut rx_a) = join(&arena, 1, "alice");
    let (bob, _rx_b) = join(&arena, 2, "bob");
    start(&arena, &[alice, bob]);
    let room = arena.room_of(alice).unwrap();

    sleep(ms(1050)).await;
    let terminal = last_state(&mut rx_a).unwrap();
    assert!(terminal.over);
    assert_eq!(terminal.tick, 10);
    assert_eq!(terminal.left, 0);

    let outcome = room.with(|r| r.outcome()).unwrap();
    let expected = match outcome {
        Outcome::Draw => 2,
        Outcome::Won(_) => 1,
    };
    assert_eq!(scores.top(10).len(), expected);
}

/// Test bot never reaches the leaderboard
#[tokio::test(start_paused = true)]
async fn test_bot_never_recorded() {
    let (arena, scores) = arena(config().with_round_secs(1));
    let (alice, _rx) = join(&arena, 1, "alice");
    sleep(ms(1501)).await;
    arena.handle(alice, ClientEvent::CountdownDone);

    sleep(ms(1100)).await;
    let room = arena.room_of(alice).unwrap();
    assert_eq!(room.with(|r| r.phase()), Phase::Over);
    assert!(scores.top(10).iter().all(|e| e.nick != "Bot"));
}

/// Test rematch in a bot match restarts on one request
#[tokio::test(start_paused = true)]
async fn test_bot_rematch() {
    let (arena, _) = arena(config().with_round_secs(1));
    let (alice, mut rx) = join(&arena, 1, "alice");
    sleep(ms(1501)).await;
    arena.handle(alice, ClientEvent::CountdownDone);
    sleep(ms(1100)).await;

    let room = arena.room_of(alice).unwrap();
    assert_eq!(room.with(|r| r.phase()), Phase::Over);
    drain(&mut rx);

    arena.handle(alice, ClientEvent::Rematch);
    assert_eq!(room.with(|r| r.phase()), Phase::Countdown);
    assert_eq!(room.with(|r| r.generation()), 1);
    assert_eq!(last_match_start(&mut rx).0, Slot::A);

    // Safety timer of the new round.
    sleep(ms(4001)).await;
    assert_eq!(room.with(|r| r.phase()), Phase::Running);
}

/// Test two-human rematch handshake and GC cancellation
#[tokio::test(start_paused = true)]
async fn test_rematch_handshake_cancels_gc() {
    let mut config = config().with_round_secs(1);
    config.room_grace_secs = 2;
    let (arena, _) = arena(config);
    let (alice, _rx_a) = join(&arena, 1, "alice");
    let (bob, mut rx_b) = join(&arena, 2, "bob");
    start(&arena, &[alice, bob]);
    let room = arena.room_of(alice).unwrap();

    sleep(ms(1050)).await;
    assert_eq!(room.with(|r| r.phase()), Phase::Over);
    drain(&mut rx_b);

    arena.handle(alice, ClientEvent::Rematch);
    assert_eq!(
        drain(&mut rx_b),
        vec![ServerEvent::RematchWait { p1: true, p2: false }]
    );
    assert_eq!(room.with(|r| r.phase()), Phase::Over);

    arena.handle(bob, ClientEvent::Rematch);
    assert_eq!(room.with(|r| r.phase()), Phase::Countdown);
    assert_eq!(last_match_start(&mut rx_b).0, Slot::B);

    // Past the old GC deadline, before the new safety timer.
    sleep(ms(3000)).await;
    assert_eq!(arena.room_count(), 1);
    assert_eq!(room.with(|r| r.phase()), Phase::Countdown);
}

/// Test finished rooms are collected after the grace period
#[tokio::test(start_paused = true)]
async fn test_finished_room_collected() {
    let mut config = config().with_round_secs(1);
    config.room_grace_secs = 2;
    let (arena, _) = arena(config);
    let (alice, _rx_a) = join(&arena, 1, "alice");
    let (bob, _rx_b) = join(&arena, 2, "bob");
    start(&arena, &[alice, bob]);

    sleep(ms(1050)).await;
    assert_eq!(arena.room_count(), 1);

    sleep(ms(2000)).await;
    assert_eq!(arena.room_count(), 0);
    assert!(arena.room_of(alice).is_none());
    assert!(arena.room_of(bob).is_none());
}

/// Test the remaining human can rematch after the partner left
#[tokio::test(start_paused = true)]
async fn test_rematch_after_partner_left() {
    let (arena, _) = arena(config());
    let (alice, mut rx_a) = join(&arena, 1, "alice");
    let (bob, _rx_b) = join(&arena, 2, "bob");
    start(&arena, &[alice, bob]);
    let room = arena.room_of(alice).unwrap();

    arena.disconnect(bob);
    drain(&mut rx_a);
    arena.handle(alice, ClientEvent::Rematch);

    assert_eq!(room.with(|r| r.phase()), Phase::Countdown);
    assert_eq!(room.with(|r| r.generation()), 1);
    assert_eq!(last_match_start(&mut rx_a).0, Slot::A);

    // Only alice is attached, so her signal alone starts the round.
    arena.handle(alice, ClientEvent::CountdownDone);
    assert_eq!(room.with(|r| r.phase()), Phase::Running);
}

/// Test a partner leaving after a rematch request lets the round restart
#[tokio::test(start_paused = true)]
async fn test_partner_leaving_releases_rematch() {
    let mut config = config().with_round_secs(1);
    config.room_grace_secs = 2;
    let (arena, _) = arena(config);
    let (alice, mut rx_a) = join(&arena, 1, "alice");
    let (bob, _rx_b) = join(&arena, 2, "bob");
    start(&arena, &[alice, bob]);
    let room = arena.room_of(alice).unwrap();

    sleep(ms(1050)).await;
    assert_eq!(room.with(|r| r.phase()), Phase::Over);
    arena.handle(alice, ClientEvent::Rematch);
    assert_eq!(room.with(|r| r.phase()), Phase::Over);
    drain(&mut rx_a);

    arena.handle(bob, ClientEvent::FindNew);
    assert_eq!(room.with(|r| r.phase()), Phase::Countdown);
    assert_eq!(last_match_start(&mut rx_a).0, Slot::A);

    // The old GC is gone and the new safety timer starts the round.
    sleep(ms(4001)).await;
    assert_eq!(arena.room_of(alice).unwrap().id(), room.id());
    assert_eq!(room.with(|r| r.phase()), Phase::Running);
}

/// Test invalid configs are refused up front
#[tokio::test(start_paused = true)]
async fn test_invalid_config_rejected() {
    let scores = Arc::new(Highscores::new(10));
    assert!(Arena::new(config().with_snapshot_every(0), scores.clone()).is_err());
    assert!(Arena::new(config().with_tick_ms(0), scores.clone()).is_err());
    assert!(Arena::new(config(), scores).is_ok());
}

/// Test events from unknown sessions are ignored
#[tokio::test(start_paused = true)]
async fn test_unknown_session_ignored() {
    let (arena, _) = arena(config());
    arena.handle(999, ClientEvent::Input { dx: 1, dy: 0 });
    arena.handle(999, ClientEvent::Rematch);
    arena.disconnect(999);
    assert_eq!(arena.room_count(), 0);
}

// Helpers

fn config() -> GameConfig {
    GameConfig::default().in_memory().with_seed(7)
}

fn arena(config: GameConfig) -> (Arc<Arena>, Arc<Highscores>) {
    let scores = Arc::new(Highscores::new(config.highscore_cap));
    let arena = Arena::new(config, scores.clone()).unwrap();
    (arena, scores)
}

fn ip(last: u8) -> IpAddr {
    IpAddr::from([10, 0, 0, last])
}

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

fn set_nick(nick: &str) -> ClientEvent {
    ClientEvent::SetNick { nick: nick.into() }
}

fn join(arena: &Arc<Arena>, origin: u8, nick: &str) -> (SessionId, UnboundedReceiver<ServerEvent>) {
    let (id, rx) = arena.connect(ip(origin));
    arena.handle(id, set_nick(nick));
    (id, rx)
}

fn start(arena: &Arc<Arena>, sessions: &[SessionId]) {
    for &id in sessions {
        arena.handle(id, ClientEvent::CountdownDone);
    }
}

fn drain(rx: &mut UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn last_state(rx: &mut UnboundedReceiver<ServerEvent>) -> Option<Snapshot> {
    drain(rx).into_iter().rev().find_map(|event| match event {
        ServerEvent::State(snapshot) => Some(snapshot),
        _ => None,
    })
}

fn last_match_start(rx: &mut UnboundedReceiver<ServerEvent>) -> (Slot, String, String) {
    drain(rx)
        .into_iter()
        .rev()
        .find_map(|event| match event {
            ServerEvent::MatchStart { role, n1, n2, .. } => Some((role, n1, n2)),
            _ => None,
        })
        .expect("match_start")
}
