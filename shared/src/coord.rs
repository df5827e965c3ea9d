use serde::{Deserialize, Serialize};
use std::ops::Add;

/// A cell position on the toroidal board, or a relative offset between cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coord {
    pub x: i32,
    pub y: i32,
}

impl Coord {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Folds the coordinate back onto a `width` x `height` board.
    pub fn wrap(self, width: i32, height: i32) -> Self {
        Self {
            x: self.x.rem_euclid(width),
            y: self.y.rem_euclid(height),
        }
    }

    /// One step in `direction`, wrapped onto the board.
    pub fn step(self, direction: Direction, width: i32, height: i32) -> Self {
        (self + direction.offset()).wrap(width, height)
    }

    /// Manhattan length of an axis-aligned offset.
    pub fn run_length(self) -> i32 {
        self.x.abs() + self.y.abs()
    }

    /// Unit vector of an axis-aligned offset (zero stays zero).
    pub fn unit(self) -> Self {
        Self {
            x: self.x.signum(),
            y: self.y.signum(),
        }
    }

    pub fn is_zero(self) -> bool {
        self.x == 0 && self.y == 0
    }
}

impl Add for Coord {
    type Output = Coord;

    fn add(self, other: Coord) -> Coord {
        Coord::new(self.x + other.x, self.y + other.y)
    }
}

impl std::fmt::Display for Coord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Heading of a snake. `Down` grows `y`, `Right` grows `x`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
    ];

    pub fn opposite(self) -> Direction {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
        }
    }

    pub fn is_opposite(self, other: Direction) -> bool {
        self.opposite() == other
    }

    pub fn offset(self) -> Coord {
        match self {
            Direction::Up => Coord::new(0, -1),
            Direction::Down => Coord::new(0, 1),
            Direction::Left => Coord::new(-1, 0),
            Direction::Right => Coord::new(1, 0),
        }
    }

    /// Direction an axis-aligned offset points in; `None` for the zero offset.
    pub fn of_offset(offset: Coord) -> Option<Direction> {
        if offset.x > 0 {
            Some(Direction::Right)
        } else if offset.x < 0 {
            Some(Direction::Left)
        } else if offset.y > 0 {
            Some(Direction::Down)
        } else if offset.y < 0 {
            Some(Direction::Up)
        } else {
            None
        }
    }
}
