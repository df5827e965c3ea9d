//! One discrete step of the snake world
//!
//! Only the master runs this. Replicas never re-simulate; they adopt the
//! snapshots the master broadcasts after each tick.

use crate::state::GameState;
use log::debug;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use shared::{Coord, Direction, PlayerId, Snake};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Chance that each cell of a dead snake turns into food.
const DEATH_FOOD_CHANCE: f64 = 0.5;

pub struct Simulation {
    rng: StdRng,
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulation {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// A simulation with reproducible randomness, for tests and benchmarks.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Advances `state` by one tick and returns the ids of snakes that died
    ///
    /// `moves` holds the latest requested heading per player. Requests for
    /// unknown players, zombie snakes, or reversals are ignored.
    pub fn tick(
        &mut self,
        state: &mut GameState,
        moves: &HashMap<PlayerId, Direction>,
    ) -> Vec<PlayerId> {
        let (w, h) = (state.config.width(), state.config.height());

        for (player_id, direction) in moves {
            if let Some(snake) = state.snakes.get_mut(player_id) {
                if snake.is_alive() {
                    snake.steer(*direction);
                }
            }
        }

        // Food is judged against the board before anyone moves.
        let mut new_heads: BTreeMap<PlayerId, Coord> = BTreeMap::new();
        let mut eaten: BTreeSet<Coord> = BTreeSet::new();
        let mut ate: BTreeSet<PlayerId> = BTreeSet::new();
        for (player_id, snake) in &state.snakes {
            let head = snake.next_head(w, h);
            if state.foods.contains(&head) {
                eaten.insert(head);
                ate.insert(*player_id);
            }
            new_heads.insert(*player_id, head);
        }

        for player_id in &ate {
            if let Some(player) = state.players.get_mut(*player_id) {
                player.score += 1;
            }
        }
        for food in &eaten {
            state.foods.remove(food);
        }

        for (player_id, snake) in state.snakes.iter_mut() {
            snake.advance(w, h, ate.contains(player_id));
        }

        let bodies: Vec<(PlayerId, Vec<Coord>)> = state
            .snakes
            .iter()
            .map(|(id, snake)| (*id, snake.cells(w, h)))
            .collect();

        let mut dead: BTreeSet<PlayerId> = BTreeSet::new();
        let mut hit_credits: BTreeMap<PlayerId, u32> = BTreeMap::new();

        for (player_id, head) in &new_heads {
            for (other_id, cells) in &bodies {
                let skip = if other_id == player_id { 1 } else { 0 };
                if cells.iter().skip(skip).any(|cell| cell == head) {
                    dead.insert(*player_id);
                    if other_id != player_id {
                        *hit_credits.entry(*other_id).or_insert(0) += 1;
                    }
                    break;
                }
            }
        }

        let mut heads_at: HashMap<Coord, Vec<PlayerId>> = HashMap::new();
        for (player_id, head) in &new_heads {
            heads_at.entry(*head).or_default().push(*player_id);
        }
        for ids in heads_at.values().filter(|ids| ids.len() > 1) {
            dead.extend(ids.iter().copied());
        }

        for (player_id, credit) in hit_credits {
            if dead.contains(&player_id) {
                continue;
            }
            if let Some(player) = state.players.get_mut(player_id) {
                player.score += credit;
            }
        }

        for player_id in &dead {
            if let Some(snake) = state.snakes.remove(player_id) {
                for cell in snake.cells(w, h) {
                    if self.rng.gen_bool(DEATH_FOOD_CHANCE) {
                        state.foods.insert(cell);
                    }
                }
                debug!("Snake of player {} died", player_id);
            }
        }

        state.replenish_food(&mut self.rng);
        state.state_order += 1;

        dead.into_iter().collect()
    }

    /// Tops up food outside of a tick, e.g. right after a session starts.
    pub fn spawn_food(&mut self, state: &mut GameState) {
        state.replenish_food(&mut self.rng);
    }

    /// Places a fresh snake for `player_id` in a random free region
    ///
    /// The new snake is not inserted into `state`; food under its head and tail
    /// is cleared. Returns `None` when no spawn region is free.
    pub fn create_snake_for_player(
        &mut self,
        state: &mut GameState,
        player_id: PlayerId,
    ) -> Option<Snake> {
        let (w, h) = (state.config.width(), state.config.height());
        let center = state.find_free_square(&mut self.rng)?;
        let direction = *Direction::ALL.choose(&mut self.rng)?;

        let snake = Snake::new(player_id, center, direction);
        for cell in snake.cells(w, h) {
            state.foods.remove(&cell);
        }
        Some(snake)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{GameConfig, NodeRole, SnakeState};
    use std::time::Instant;

    fn board(width: i32, height: i32) -> GameState {
        GameState::new(GameConfig::new(width, height, 0, 1000))
    }

    fn add_player(state: &mut GameState, name: &str) -> PlayerId {
        state
            .players
            .add_player(name, None, NodeRole::Normal, Instant::now())
    }

    fn place(state: &mut GameState, id: PlayerId, head: (i32, i32), direction: Direction) {
        state
            .snakes
            .insert(id, Snake::new(id, Coord::new(head.0, head.1), direction));
    }

    #[test]
    fn test_snake_eats_food_and_grows() {
        let mut state = board(40, 30);
        let id = add_player(&mut state, "alice");
        place(&mut state, id, (20, 15), Direction::Right);
        state.foods.insert(Coord::new(21, 15));
        let order_before = state.state_order;
        let len_before = state.snakes[&id].len();

        let mut sim = Simulation::with_seed(3);
        let dead = sim.tick(&mut state, &HashMap::new());

        assert!(dead.is_empty());
        let snake = &state.snakes[&id];
        assert_eq!(snake.head(), Coord::new(21, 15));
        assert_eq!(snake.len(), len_before + 1);
        assert!(!state.foods.contains(&Coord::new(21, 15)));
        assert_eq!(state.players.get(id).unwrap().score, 1);
        assert_eq!(state.state_order, order_before + 1);
    }

    #[test]
    fn test_reverse_input_is_ignored() {
        let mut state = board(40, 30);
        let id = add_player(&mut state, "alice");
        place(&mut state, id, (10, 10), Direction::Right);

        let moves = HashMap::from([(id, Direction::Left)]);
        Simulation::with_seed(1).tick(&mut state, &moves);

        let snake = &state.snakes[&id];
        assert_eq!(snake.head_direction, Direction::Right);
        assert_eq!(snake.head(), Coord::new(11, 10));
    }

    #[test]
    fn test_zombie_ignores_input_but_keeps_moving() {
        let mut state = board(40, 30);
        place(&mut state, 9, (10, 10), Direction::Up);
        state.snakes.get_mut(&9).unwrap().state = SnakeState::Zombie;

        let moves = HashMap::from([(9, Direction::Left)]);
        Simulation::with_seed(1).tick(&mut state, &moves);

        let zombie = &state.snakes[&9];
        assert_eq!(zombie.head_direction, Direction::Up);
        assert_eq!(zombie.head(), Coord::new(10, 9));
    }

    #[test]
    fn test_head_on_collision_kills_both() {
        let mut state = board(40, 30);
        let a = add_player(&mut state, "alice");
        let b = add_player(&mut state, "bob");
        place(&mut state, a, (10, 10), Direction::Right);
        place(&mut state, b, (12, 10), Direction::Left);

        let dead = Simulation::with_seed(5).tick(&mut state, &HashMap::new());

        assert_eq!(dead, vec![a, b]);
        assert!(state.snakes.is_empty());
        assert_eq!(state.players.get(a).unwrap().score, 0);
        assert_eq!(state.players.get(b).unwrap().score, 0);
    }

    #[test]
    fn test_body_hit_credits_the_survivor() {
        let mut state = board(40, 30);
        let hunter = add_player(&mut state, "alice");
        let victim = add_player(&mut state, "bob");
        // Victim runs vertically through (10, 10); hunter drives into its body.
        state.snakes.insert(
            victim,
            Snake {
                player_id: victim,
                points: vec![Coord::new(10, 8), Coord::new(0, 4)],
                head_direction: Direction::Up,
                state: SnakeState::Alive,
            },
        );
        place(&mut state, hunter, (9, 10), Direction::Right);

        let dead = Simulation::with_seed(11).tick(&mut state, &HashMap::new());

        assert_eq!(dead, vec![hunter]);
        assert!(state.snakes.contains_key(&victim));
        assert!(!state.snakes.contains_key(&hunter));
        assert_eq!(state.players.get(victim).unwrap().score, 1);
    }

    #[test]
    fn test_state_order_advances_once_per_tick() {
        let mut state = board(20, 20);
        let mut sim = Simulation::with_seed(2);
        for expected in 1..=5 {
            sim.tick(&mut state, &HashMap::new());
            assert_eq!(state.state_order, expected);
        }
    }

    #[test]
    fn test_spawn_clears_food_under_new_snake() {
        let mut state = board(10, 10);
        for x in 0..10 {
            for y in 0..10 {
                state.foods.insert(Coord::new(x, y));
            }
        }

        let mut sim = Simulation::with_seed(8);
        let snake = sim.create_snake_for_player(&mut state, 1).unwrap();

        for cell in snake.cells(10, 10) {
            assert!(!state.foods.contains(&cell));
        }
        assert_eq!(state.foods.len(), 98);
    }

    #[test]
    fn test_spawn_fails_on_crowded_board() {
        let mut state = board(10, 10);
        for (id, head) in [(1, (0, 0)), (2, (0, 5)), (3, (5, 0)), (4, (5, 5))] {
            place(&mut state, id, head, Direction::Right);
        }

        let mut sim = Simulation::with_seed(4);
        assert!(sim.create_snake_for_player(&mut state, 5).is_none());
    }
}
