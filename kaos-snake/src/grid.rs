//! Grid geometry and occupancy helpers.

use std::collections::HashSet;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Attempts at uniform rejection sampling before scanning for free cells.
const SAMPLE_ATTEMPTS: usize = 64;

/// A grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cell {
    pub x: i32,
    pub y: i32,
}

impl Cell {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    #[inline]
    pub fn step(self, dir: Dir) -> Self {
        let (dx, dy) = dir.delta();
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }

    #[inline]
    pub fn manhattan(self, other: Cell) -> u32 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y)
    }
}

/// Movement direction. `y` grows downwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dir {
    Up,
    Down,
    Left,
    Right,
}

impl Dir {
    pub const ALL: [Dir; 4] = [Dir::Up, Dir::Right, Dir::Down, Dir::Left];

    #[inline]
    pub fn delta(self) -> (i32, i32) {
        match self {
            Dir::Up => (0, -1),
            Dir::Down => (0, 1),
            Dir::Left => (-1, 0),
            Dir::Right => (1, 0),
        }
    }

    /// Parse a unit axis vector. Anything else (zero, diagonal, long) is `None`.
    pub fn from_vector(dx: i32, dy: i32) -> Option<Dir> {
        match (dx, dy) {
            (0, -1) => Some(Dir::Up),
            (0, 1) => Some(Dir::Down),
            (-1, 0) => Some(Dir::Left),
            (1, 0) => Some(Dir::Right),
            _ => None,
        }
    }

    #[inline]
    pub fn opposite(self) -> Dir {
        match self {
            Dir::Up => Dir::Down,
            Dir::Down => Dir::Up,
            Dir::Left => Dir::Right,
            Dir::Right => Dir::Left,
        }
    }
}

/// Fixed-size playfield.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grid {
    pub width: i32,
    pub height: i32,
}

impl Grid {
    pub fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    #[inline]
    pub fn contains(&self, cell: Cell) -> bool {
        cell.x >= 0 && cell.x < self.width && cell.y >= 0 && cell.y < self.height
    }

    pub fn cell_count(&self) -> usize {
        (self.width.max(0) as usize) * (self.height.max(0) as usize)
    }

    /// Pick a uniformly random cell not in `occupied`.
    ///
    /// Returns `None` only when the grid is full.
    pub fn random_empty<R: Rng + ?Sized>(&self, occupied: &HashSet<Cell>, rng: &mut R) -> Option<Cell> {
        if occupied.len() < self.cell_count() / 2 {
            for _ in 0..SAMPLE_ATTEMPTS {
                let cell = Cell::new(rng.gen_range(0..self.width), rng.gen_range(0..self.height));
                if !occupied.contains(&cell) {
                    return Some(cell);
                }
            }
        }

        let free: Vec<Cell> = (0..self.height)
            .flat_map(|y| (0..self.width).map(move |x| Cell::new(x, y)))
            .filter(|c| !occupied.contains(c))
            .collect();
        if free.is_empty() {
            None
        } else {
            Some(free[rng.gen_range(0..free.len())])
        }
    }
}

/// Build the occupancy set of several bodies.
pub fn occupancy<'a, I, B>(bodies: I) -> HashSet<Cell>
where
    I: IntoIterator<Item = B>,
    B: IntoIterator<Item = &'a Cell>,
{
    let mut set = HashSet::new();
    for body in bodies {
        set.extend(body.into_iter().copied());
    }
    set
}
