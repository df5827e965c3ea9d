use crate::roster::Roster;
use log::warn;
use rand::seq::{IteratorRandom, SliceRandom};
use rand::Rng;
use shared::{Coord, GameConfig, PlayerId, Snake, StateSnapshot, SPAWN_REGION};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::time::Instant;

/// The authoritative game world
///
/// On the master this is mutated by the simulation every tick; on replicas it
/// is replaced wholesale whenever a newer snapshot is adopted.
#[derive(Debug, Clone)]
pub struct GameState {
    pub config: GameConfig,
    /// Version counter; bumped exactly once per tick.
    pub state_order: u32,
    pub snakes: BTreeMap<PlayerId, Snake>,
    pub foods: BTreeSet<Coord>,
    pub players: Roster,
}

impl GameState {
    pub fn new(config: GameConfig) -> Self {
        Self {
            config,
            state_order: 0,
            snakes: BTreeMap::new(),
            foods: BTreeSet::new(),
            players: Roster::new(),
        }
    }

    /// Rebuilds a state from a replicated snapshot.
    pub fn from_snapshot(config: GameConfig, snapshot: StateSnapshot, now: Instant) -> Self {
        Self {
            config,
            state_order: snapshot.state_order,
            snakes: snapshot
                .snakes
                .into_iter()
                .filter(|snake| {
                    if snake.is_empty() {
                        warn!("Dropping snake of player {} with no body", snake.player_id);
                    }
                    !snake.is_empty()
                })
                .map(|snake| (snake.player_id, snake))
                .collect(),
            foods: snapshot.foods.into_iter().collect(),
            players: Roster::from_players(snapshot.players, now),
        }
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            state_order: self.state_order,
            snakes: self.snakes.values().cloned().collect(),
            foods: self.foods.iter().copied().collect(),
            players: self.players.to_vec(),
        }
    }

    pub fn alive_snake_count(&self) -> usize {
        self.snakes.values().filter(|s| s.is_alive()).count()
    }

    /// Every cell covered by any snake body.
    pub fn occupied_cells(&self) -> HashSet<Coord> {
        let (w, h) = (self.config.width(), self.config.height());
        self.snakes
            .values()
            .flat_map(|snake| snake.cells(w, h))
            .collect()
    }

    /// Centres of every spawn-sized square free of snakes
    ///
    /// Squares may wrap around the board edges. Food inside a square does not
    /// block it.
    pub fn free_square_centers(&self) -> Vec<Coord> {
        let (w, h) = (self.config.width(), self.config.height());
        let occupied = self.occupied_cells();
        let half = SPAWN_REGION / 2;

        let mut centers = Vec::new();
        for x in 0..w {
            for y in 0..h {
                let blocked = (0..SPAWN_REGION).any(|dx| {
                    (0..SPAWN_REGION)
                        .any(|dy| occupied.contains(&Coord::new(x + dx, y + dy).wrap(w, h)))
                });
                if !blocked {
                    centers.push(Coord::new(x + half, y + half).wrap(w, h));
                }
            }
        }
        centers
    }

    pub fn has_free_square(&self) -> bool {
        !self.free_square_centers().is_empty()
    }

    /// Picks the centre of a random free square, if there is one.
    pub fn find_free_square<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Coord> {
        self.free_square_centers().choose(rng).copied()
    }

    /// Tops food up to `food_static + alive snakes`
    ///
    /// New food lands on cells holding neither a snake nor food. If the board
    /// runs out of such cells the quota is simply left unmet.
    pub fn replenish_food<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let required = self.config.food_static() as usize + self.alive_snake_count();
        if self.foods.len() >= required {
            return;
        }

        let (w, h) = (self.config.width(), self.config.height());
        let occupied = self.occupied_cells();
        let missing = required - self.foods.len();

        let free = (0..w)
            .flat_map(|x| (0..h).map(move |y| Coord::new(x, y)))
            .filter(|cell| !occupied.contains(cell) && !self.foods.contains(cell));
        let placed = free.choose_multiple(rng, missing);
        self.foods.extend(placed);
    }
}
