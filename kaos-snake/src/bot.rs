//! Bot policy for the AI-controlled slot.
//!
//! Greedy and stateless: look one step ahead, never reverse, never step into
//! a wall or a body if any alternative exists, and close in on the target.

use crate::grid::{Cell, Dir, Grid};
use crate::snake::Snake;

/// Would moving `me` one cell in `dir` kill it?
pub fn is_deadly(grid: &Grid, me: &Snake, rival: &Snake, dir: Dir) -> bool {
    let next = me.head().step(dir);
    !grid.contains(next) || me.contains(next) || rival.contains(next)
}

/// Choose the bot's next direction.
///
/// `target` is the special food when present, else the normal food. Among
/// the safe candidates the one closest to the target wins; ties prefer
/// keeping the current heading, then `Dir::ALL` order. With no safe
/// candidate the current direction is kept.
pub fn decide(grid: &Grid, me: &Snake, rival: &Snake, target: Option<Cell>) -> Dir {
    let current = me.dir();
    let candidates = std::iter::once(current)
        .chain(Dir::ALL.into_iter().filter(|&d| d != current))
        .filter(|&d| d != current.opposite())
        .enumerate();

    let mut best: Option<(u32, usize, Dir)> = None;
    for (rank, dir) in candidates {
        if is_deadly(grid, me, rival, dir) {
            continue;
        }
        let distance = target.map_or(0, |t| me.head().step(dir).manhattan(t));
        let key = (distance, rank, dir);
        if best.map_or(true, |b| (key.0, key.1) < (b.0, b.1)) {
            best = Some(key);
        }
    }

    best.map_or(current, |(_, _, dir)| dir)
}
