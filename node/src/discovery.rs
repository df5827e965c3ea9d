use shared::{GameAnnouncement, GameConfig};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Sessions not announced for this long are dropped from the lobby.
pub const DISCOVERY_WINDOW: Duration = Duration::from_secs(3);

/// A session seen in an announcement.
#[derive(Debug, Clone, PartialEq)]
pub struct GameInfo {
    pub name: String,
    pub master_addr: SocketAddr,
    pub config: GameConfig,
    pub player_count: usize,
    pub can_join: bool,
    pub last_seen: Instant,
}

/// Known sessions keyed by announcing master and game name.
#[derive(Debug, Default)]
pub struct Registry {
    games: BTreeMap<(SocketAddr, String), GameInfo>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or refreshes a session announced by `sender`.
    /// Returns whether the session was not known before.
    pub fn observe(
        &mut self,
        announcement: &GameAnnouncement,
        sender: SocketAddr,
        now: Instant,
    ) -> bool {
        let info = GameInfo {
            name: announcement.game_name.clone(),
            master_addr: sender,
            config: announcement.config,
            player_count: announcement.players.len(),
            can_join: announcement.can_join,
            last_seen: now,
        };
        self.games
            .insert((sender, announcement.game_name.clone()), info)
            .is_none()
    }

    /// Drops sessions silent for longer than the discovery window.
    /// Returns whether anything was removed.
    pub fn evict_stale(&mut self, now: Instant) -> bool {
        let before = self.games.len();
        self.games
            .retain(|_, info| now.saturating_duration_since(info.last_seen) <= DISCOVERY_WINDOW);
        self.games.len() != before
    }

    /// Every known session, ordered by master address then name.
    pub fn list(&self) -> Vec<GameInfo> {
        self.games.values().cloned().collect()
    }

    /// Most recently announced session called `name`.
    pub fn find(&self, name: &str) -> Option<&GameInfo> {
        self.games
            .values()
            .filter(|info| info.name == name)
            .max_by_key(|info| info.last_seen)
    }

    pub fn len(&self) -> usize {
        self.games.len()
    }

    pub fn is_empty(&self) -> bool {
        self.games.is_empty()
    }
}
