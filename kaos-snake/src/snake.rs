//! Per-contestant snake state.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::grid::{Cell, Dir};

/// Counters reported alongside each snake in snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnakeStats {
    pub normal: u32,
    pub special: u32,
    pub moves: u32,
}

/// A snake. The head is always `body[0]`.
#[derive(Debug, Clone)]
pub struct Snake {
    body: VecDeque<Cell>,
    dir: Dir,
    queued: Dir,
    score: u32,
    growth: u32,
    stats: SnakeStats,
}

impl Snake {
    /// A straight snake of `len` cells with its head at `head`, facing `dir`.
    pub fn new(head: Cell, dir: Dir, len: usize) -> Self {
        let (dx, dy) = dir.delta();
        let body = (0..len as i32)
            .map(|i| Cell::new(head.x - i * dx, head.y - i * dy))
            .collect();
        Self {
            body,
            dir,
            queued: dir,
            score: 0,
            growth: 0,
            stats: SnakeStats::default(),
        }
    }

    #[inline]
    pub fn head(&self) -> Cell {
        self.body[0]
    }

    pub fn body(&self) -> &VecDeque<Cell> {
        &self.body
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    pub fn dir(&self) -> Dir {
        self.dir
    }

    pub fn queued_dir(&self) -> Dir {
        self.queued
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    pub fn pending_growth(&self) -> u32 {
        self.growth
    }

    pub fn stats(&self) -> SnakeStats {
        self.stats
    }

    /// Queue a direction for the next tick.
    ///
    /// A reversal of the current direction is ignored and `false` returned.
    pub fn queue_direction(&mut self, dir: Dir) -> bool {
        if dir == self.dir.opposite() {
            return false;
        }
        self.queued = dir;
        true
    }

    /// Move one cell. Returns the dropped tail cell, if any.
    pub fn advance(&mut self) -> Option<Cell> {
        self.dir = self.queued;
        let head = self.head().step(self.dir);
        self.body.push_front(head);
        self.stats.moves += 1;
        if self.growth > 0 {
            self.growth -= 1;
            None
        } else {
            self.body.pop_back()
        }
    }

    pub fn contains(&self, cell: Cell) -> bool {
        self.body.contains(&cell)
    }

    /// Head overlaps a non-head segment of its own body.
    pub fn bites_itself(&self) -> bool {
        let head = self.head();
        self.body.iter().skip(1).any(|&c| c == head)
    }

    pub(crate) fn eat_normal(&mut self) {
        self.score += 1;
        self.growth += 1;
        self.stats.normal += 1;
    }

    pub(crate) fn eat_special(&mut self, bonus: u32) {
        self.score += bonus;
        self.growth += bonus;
        self.stats.special += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_lays_body_behind_head() {
        let snake = Snake::new(Cell::new(5, 5), Dir::Right, 5);
        let cells: Vec<Cell> = snake.body().iter().copied().collect();
        assert_eq!(cells.first(), Some(&Cell::new(5, 5)));
        assert_eq!(cells.last(), Some(&Cell::new(1, 5)));
        assert_eq!(snake.len(), 5);
    }

    #[test]
    fn test_advance_drops_tail() {
        let mut snake = Snake::new(Cell::new(5, 5), Dir::Right, 5);
        let dropped = snake.advance();
        assert_eq!(snake.head(), Cell::new(6, 5));
        assert_eq!(dropped, Some(Cell::new(1, 5)));
        assert_eq!(snake.len(), 5);
        assert_eq!(snake.stats().moves, 1);
    }

    #[test]
    fn test_growth_keeps_tail() {
        let mut snake = Snake::new(Cell::new(5, 5), Dir::Right, 5);
        snake.eat_normal();
        assert_eq!(snake.pending_growth(), 1);

        assert_eq!(snake.advance(), None);
        assert_eq!(snake.len(), 6);
        assert_eq!(snake.pending_growth(), 0);

        assert!(snake.advance().is_some());
        assert_eq!(snake.len(), 6);
    }

    #[test]
    fn test_reversal_ignored() {
        let mut snake = Snake::new(Cell::new(5, 5), Dir::Right, 5);
        assert!(!snake.queue_direction(Dir::Left));
        assert_eq!(snake.queued_dir(), Dir::Right);

        assert!(snake.queue_direction(Dir::Up));
        snake.advance();
        assert_eq!(snake.dir(), Dir::Up);
        assert_eq!(snake.head(), Cell::new(5, 4));
    }

    #[test]
    fn test_bites_itself() {
        let mut snake = Snake::new(Cell::new(5, 5), Dir::Right, 5);
        snake.queue_direction(Dir::Up);
        snake.advance();
        snake.queue_direction(Dir::Left);
        snake.advance();
        assert!(!snake.bites_itself());
        snake.queue_direction(Dir::Down);
        snake.advance();
        assert!(snake.bites_itself());
    }
}
