//! Types shared by every node of a snake session: board geometry, the snake
//! body model, session configuration and the datagram protocol.

use std::net::Ipv4Addr;

mod config;
mod coord;
mod protocol;
mod snake;

pub use config::{
    GameConfig, MAX_FOOD_STATIC, MAX_SIDE, MAX_STATE_DELAY_MS, MIN_SIDE, MIN_STATE_DELAY_MS,
};
pub use coord::{Coord, Direction};
pub use protocol::{
    decode, encode, GameAnnouncement, GameMessage, NodeRole, Payload, Player, PlayerSummary,
    StateSnapshot,
};
pub use snake::{Snake, SnakeState};

pub type PlayerId = u32;

/// Group that masters announce their sessions to.
pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 192, 0, 4);
pub const MULTICAST_PORT: u16 = 9192;

/// Largest datagram a node will try to receive.
pub const MAX_DATAGRAM: usize = 65_535;

/// Side of the square region a new snake needs free.
pub const SPAWN_REGION: i32 = 5;
