use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const MIN_SIDE: i32 = 10;
pub const MAX_SIDE: i32 = 100;
pub const MAX_FOOD_STATIC: i32 = 100;
pub const MIN_STATE_DELAY_MS: u32 = 100;
pub const MAX_STATE_DELAY_MS: u32 = 3000;

/// Board and timing parameters of one session.
///
/// Every value is clamped into its legal range when constructed, including
/// when a config arrives over the wire, so a `GameConfig` is always in bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawGameConfig", into = "RawGameConfig")]
pub struct GameConfig {
    width: i32,
    height: i32,
    food_static: i32,
    state_delay_ms: u32,
}

#[derive(Serialize, Deserialize)]
struct RawGameConfig {
    width: i32,
    height: i32,
    food_static: i32,
    state_delay_ms: u32,
}

impl From<RawGameConfig> for GameConfig {
    fn from(raw: RawGameConfig) -> Self {
        GameConfig::new(raw.width, raw.height, raw.food_static, raw.state_delay_ms)
    }
}

impl From<GameConfig> for RawGameConfig {
    fn from(config: GameConfig) -> Self {
        RawGameConfig {
            width: config.width,
            height: config.height,
            food_static: config.food_static,
            state_delay_ms: config.state_delay_ms,
        }
    }
}

impl Default for GameConfig {
    fn default() -> Self {
        GameConfig::new(40, 30, 1, 1000)
    }
}

impl GameConfig {
    pub fn new(width: i32, height: i32, food_static: i32, state_delay_ms: u32) -> Self {
        Self {
            width: width.clamp(MIN_SIDE, MAX_SIDE),
            height: height.clamp(MIN_SIDE, MAX_SIDE),
            food_static: food_static.clamp(0, MAX_FOOD_STATIC),
            state_delay_ms: state_delay_ms.clamp(MIN_STATE_DELAY_MS, MAX_STATE_DELAY_MS),
        }
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn food_static(&self) -> i32 {
        self.food_static
    }

    pub fn state_delay_ms(&self) -> u32 {
        self.state_delay_ms
    }

    /// Period of the master's simulation loop.
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.state_delay_ms as u64)
    }

    /// How long an unacknowledged message waits before being resent; also the
    /// period of the reconcile loop.
    pub fn retry_interval(&self) -> Duration {
        self.tick_period() / 10
    }

    /// Age after which a ledger entry is dropped without further retries.
    pub fn abandon_after(&self) -> Duration {
        self.tick_period() * 5
    }

    pub fn node_timeout(&self) -> Duration {
        self.tick_period() * 4 / 5
    }

    /// Silence from the master after which a deputy takes over.
    pub fn master_silence(&self) -> Duration {
        self.node_timeout() * 2
    }

    /// Silence from a player after which the master demotes it.
    pub fn player_timeout(&self) -> Duration {
        self.node_timeout() * 3
    }
}
