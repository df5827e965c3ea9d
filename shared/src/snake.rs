use crate::coord::{Coord, Direction};
use crate::PlayerId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnakeState {
    Alive,
    /// Owner left or went silent; the snake keeps its heading and ignores input.
    Zombie,
}

/// A snake body stored as key points.
///
/// `points[0]` is the absolute head cell. Every following point is a relative,
/// axis-aligned offset from the end of the previous run towards the tail, so
/// `[(5, 5), (-3, 0), (0, 2)]` is a head at (5, 5), three cells to the left,
/// then two cells down. Cells are produced on demand by [`Snake::cells`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snake {
    pub player_id: PlayerId,
    pub points: Vec<Coord>,
    pub head_direction: Direction,
    pub state: SnakeState,
}

impl Snake {
    /// Creates a two-cell snake whose tail sits directly behind `head`.
    pub fn new(player_id: PlayerId, head: Coord, direction: Direction) -> Self {
        Self {
            player_id,
            points: vec![head, direction.opposite().offset()],
            head_direction: direction,
            state: SnakeState::Alive,
        }
    }

    pub fn head(&self) -> Coord {
        self.points[0]
    }

    pub fn is_alive(&self) -> bool {
        self.state == SnakeState::Alive
    }

    /// Number of cells the body covers.
    pub fn len(&self) -> usize {
        1 + self.points[1..]
            .iter()
            .map(|offset| offset.run_length() as usize)
            .sum::<usize>()
    }

    /// True for a snake without key points, which only a malformed
    /// datagram can produce.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Expands the key points into every occupied cell, head first.
    pub fn cells(&self, width: i32, height: i32) -> Vec<Coord> {
        let mut cells = Vec::with_capacity(self.len());
        let mut current = self.head();
        cells.push(current.wrap(width, height));

        for offset in &self.points[1..] {
            let unit = offset.unit();
            for _ in 0..offset.run_length() {
                current = current + unit;
                cells.push(current.wrap(width, height));
            }
        }

        cells
    }

    /// Cell the head would occupy after one step in its current heading.
    pub fn next_head(&self, width: i32, height: i32) -> Coord {
        self.head().step(self.head_direction, width, height)
    }

    /// Turns towards `direction` unless that would reverse the snake onto its neck.
    /// Returns whether the heading changed.
    pub fn steer(&mut self, direction: Direction) -> bool {
        if direction.is_opposite(self.head_direction) || direction == self.head_direction {
            return false;
        }
        self.head_direction = direction;
        true
    }

    /// Advances the head one cell. The tail shrinks by one cell unless `grow` is set.
    pub fn advance(&mut self, width: i32, height: i32, grow: bool) {
        let new_head = self.next_head(width, height);
        let back = self.head_direction.opposite();

        match self.points.get_mut(1) {
            Some(neck) if Direction::of_offset(*neck) == Some(back) => {
                *neck = *neck + back.offset();
            }
            _ => self.points.insert(1, back.offset()),
        }
        self.points[0] = new_head;

        if !grow {
            self.shrink_tail();
        }
        self.compact();
    }

    fn shrink_tail(&mut self) {
        if self.points.len() < 2 {
            return;
        }
        let last = self.points.len() - 1;
        let tail = self.points[last];
        if tail.run_length() <= 1 {
            self.points.pop();
        } else {
            let unit = tail.unit();
            self.points[last] = Coord::new(tail.x - unit.x, tail.y - unit.y);
        }
    }

    /// Merges neighbouring runs that point the same way and drops empty runs.
    fn compact(&mut self) {
        let head = self.points[0];
        let mut runs: Vec<Coord> = Vec::with_capacity(self.points.len() - 1);

        for offset in self.points[1..].iter().copied() {
            if offset.is_zero() {
                continue;
            }
            match runs.last_mut() {
                Some(last) if Direction::of_offset(*last) == Direction::of_offset(offset) => {
                    *last = *last + offset;
                }
                _ => runs.push(offset),
            }
        }

        self.points.clear();
        self.points.push(head);
        self.points.extend(runs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: i32 = 40;
    const H: i32 = 30;

    #[test]
    fn test_new_snake_has_head_and_tail() {
        let snake = Snake::new(1, Coord::new(20, 15), Direction::Right);
        assert_eq!(snake.len(), 2);
        assert_eq!(
            snake.cells(W, H),
            vec![Coord::new(20, 15), Coord::new(19, 15)]
        );
        assert!(snake.is_alive());
    }

    #[test]
    fn test_advance_keeps_length_without_food() {
        let mut snake = Snake::new(1, Coord::new(20, 15), Direction::Right);
        snake.advance(W, H, false);
        assert_eq!(
            snake.cells(W, H),
            vec![Coord::new(21, 15), Coord::new(20, 15)]
        );
        assert_eq!(snake.points.len(), 2);
    }

    #[test]
    fn test_advance_grows_by_one_when_fed() {
        let mut snake = Snake::new(1, Coord::new(20, 15), Direction::Right);
        snake.advance(W, H, true);
        assert_eq!(snake.len(), 3);
        assert_eq!(snake.points, vec![Coord::new(21, 15), Coord::new(-2, 0)]);
    }

    #[test]
    fn test_turn_creates_key_point() {
        let mut snake = Snake::new(1, Coord::new(10, 10), Direction::Right);
        snake.advance(W, H, true);
        snake.advance(W, H, true);
        assert!(snake.steer(Direction::Down));
        snake.advance(W, H, false);

        assert_eq!(
            snake.cells(W, H),
            vec![
                Coord::new(12, 11),
                Coord::new(12, 10),
                Coord::new(11, 10),
                Coord::new(10, 10),
            ]
        );
        assert_eq!(
            snake.points,
            vec![Coord::new(12, 11), Coord::new(0, -1), Coord::new(-2, 0)]
        );
    }

    #[test]
    fn test_reverse_turn_is_refused() {
        let mut snake = Snake::new(1, Coord::new(10, 10), Direction::Right);
        assert!(!snake.steer(Direction::Left));
        assert_eq!(snake.head_direction, Direction::Right);
    }

    #[test]
    fn test_body_wraps_across_edge() {
        let mut snake = Snake::new(1, Coord::new(W - 1, 0), Direction::Right);
        snake.advance(W, H, true);
        assert_eq!(
            snake.cells(W, H),
            vec![Coord::new(0, 0), Coord::new(W - 1, 0), Coord::new(W - 2, 0)]
        );
    }

    #[test]
    fn test_tail_follows_corner() {
        let mut snake = Snake::new(1, Coord::new(10, 10), Direction::Right);
        snake.advance(W, H, true);
        snake.steer(Direction::Up);
        for _ in 0..3 {
            snake.advance(W, H, false);
        }

        let cells = snake.cells(W, H);
        assert_eq!(cells.len(), 3);
        assert_eq!(
            cells,
            vec![Coord::new(11, 7), Coord::new(11, 8), Coord::new(11, 9)]
        );
        assert_eq!(snake.points.len(), 2);
    }
}
