//! Player roster of a session
//!
//! This module tracks everyone taking part in the game, including:
//! - Player id allocation (ids are never reused within a session)
//! - Address lookup for routing replies and broadcasts
//! - Activity timestamps, the heartbeat substrate for timeout detection
//! - Role queries used by deputy maintenance and master handover
//!
//! The roster is owned by the game state and replicated inside every state
//! broadcast; activity timestamps are local to each node and never sent.

use log::info;
use shared::{NodeRole, Player, PlayerId};
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Manages all players of a session and their liveness
///
/// Players are kept in id order so that "pick any" selections (deputy
/// assignment, successor choice) are stable across runs.
#[derive(Debug, Clone)]
pub struct Roster {
    /// Players indexed by their unique id
    players: BTreeMap<PlayerId, Player>,
    /// Last time we heard anything from each player
    last_seen: HashMap<PlayerId, Instant>,
    /// Next id handed out by `add_player`
    next_player_id: PlayerId,
}

impl Default for Roster {
    fn default() -> Self {
        Self::new()
    }
}

impl Roster {
    /// Creates an empty roster; the first player gets id 1.
    pub fn new() -> Self {
        Self {
            players: BTreeMap::new(),
            last_seen: HashMap::new(),
            next_player_id: 1,
        }
    }

    /// Rebuilds a roster from a replicated player list
    ///
    /// Everyone is treated as freshly active at `now`, and id allocation
    /// resumes above the highest id seen so a promoted node never reuses one.
    pub fn from_players(players: Vec<Player>, now: Instant) -> Self {
        let next_player_id = players.iter().map(|p| p.id).max().unwrap_or(0) + 1;
        let last_seen = players.iter().map(|p| (p.id, now)).collect();
        Self {
            players: players.into_iter().map(|p| (p.id, p)).collect(),
            last_seen,
            next_player_id,
        }
    }

    /// The id the next admitted player will receive.
    pub fn next_id(&self) -> PlayerId {
        self.next_player_id
    }

    /// Admits a new player and returns its id
    pub fn add_player(
        &mut self,
        name: &str,
        address: Option<SocketAddr>,
        role: NodeRole,
        now: Instant,
    ) -> PlayerId {
        let id = self.next_player_id;
        self.next_player_id += 1;

        let mut player = Player::new(id, name, role);
        player.address = address;
        match address {
            Some(addr) => info!("Player {} ({}) joined from {} as {}", id, name, addr, role),
            None => info!("Player {} ({}) joined locally as {}", id, name, role),
        }

        self.players.insert(id, player);
        self.last_seen.insert(id, now);
        id
    }

    /// Removes a player entirely; returns it if it was present.
    pub fn remove_player(&mut self, id: PlayerId) -> Option<Player> {
        self.last_seen.remove(&id);
        let removed = self.players.remove(&id);
        if let Some(player) = &removed {
            info!("Player {} ({}) removed", player.id, player.name);
        }
        removed
    }

    pub fn get(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn get_mut(&mut self, id: PlayerId) -> Option<&mut Player> {
        self.players.get_mut(&id)
    }

    /// Finds the player registered at a network address
    pub fn find_by_addr(&self, addr: SocketAddr) -> Option<PlayerId> {
        self.players
            .values()
            .find(|player| player.address == Some(addr))
            .map(|player| player.id)
    }

    /// Records activity for a player; unknown ids are ignored.
    pub fn touch(&mut self, id: PlayerId, now: Instant) {
        if self.players.contains_key(&id) {
            self.last_seen.insert(id, now);
        }
    }

    /// Marks every player as active at `now`.
    pub fn touch_all(&mut self, now: Instant) {
        for id in self.players.keys() {
            self.last_seen.insert(*id, now);
        }
    }

    /// Players other than `except` silent for longer than `timeout`
    ///
    /// A player with no activity record is given one at `now` instead of
    /// being reported.
    pub fn silent_players(
        &mut self,
        now: Instant,
        timeout: Duration,
        except: Option<PlayerId>,
    ) -> Vec<PlayerId> {
        let mut silent = Vec::new();
        for id in self.players.keys() {
            if Some(*id) == except {
                continue;
            }
            let seen = *self.last_seen.entry(*id).or_insert(now);
            if now.saturating_duration_since(seen) > timeout {
                silent.push(*id);
            }
        }
        silent
    }

    /// First player other than `except` holding `role`
    pub fn with_role(&self, role: NodeRole, except: Option<PlayerId>) -> Option<&Player> {
        self.players
            .values()
            .find(|p| p.role == role && Some(p.id) != except)
    }

    /// First reachable player other than `except` holding `role`
    pub fn reachable_with_role(&self, role: NodeRole, except: Option<PlayerId>) -> Option<&Player> {
        self.players
            .values()
            .find(|p| p.role == role && p.address.is_some() && Some(p.id) != except)
    }

    /// Ids and addresses of every reachable player except `except`
    ///
    /// Used for state broadcasts and role announcements.
    pub fn peer_addrs(&self, except: Option<PlayerId>) -> Vec<(PlayerId, SocketAddr)> {
        self.players
            .values()
            .filter(|p| Some(p.id) != except)
            .filter_map(|p| p.address.map(|addr| (p.id, addr)))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn to_vec(&self) -> Vec<Player> {
        self.players.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_addr2() -> SocketAddr {
        "127.0.0.1:8081".parse().unwrap()
    }

    #[test]
    fn test_roster_creation() {
        let roster = Roster::new();
        assert!(roster.is_empty());
        assert_eq!(roster.len(), 0);
        assert_eq!(roster.next_id(), 1);
    }

    #[test]
    fn test_add_multiple_players() {
        let mut roster = Roster::new();
        let now = Instant::now();

        let master = roster.add_player("alice", None, NodeRole::Master, now);
        let normal = roster.add_player("bob", Some(test_addr()), NodeRole::Normal, now);

        assert_eq!(master, 1);
        assert_eq!(normal, 2);
        assert_eq!(roster.len(), 2);
        assert_eq!(roster.next_id(), 3);
    }

    #[test]
    fn test_ids_are_not_reused_after_removal() {
        let mut roster = Roster::new();
        let now = Instant::now();

        let id = roster.add_player("bob", Some(test_addr()), NodeRole::Normal, now);
        assert!(roster.remove_player(id).is_some());
        assert!(roster.remove_player(id).is_none());

        let next = roster.add_player("carol", Some(test_addr2()), NodeRole::Normal, now);
        assert_eq!(next, id + 1);
    }

    #[test]
    fn test_find_by_addr() {
        let mut roster = Roster::new();
        let now = Instant::now();

        let id1 = roster.add_player("bob", Some(test_addr()), NodeRole::Normal, now);
        let _id2 = roster.add_player("carol", Some(test_addr2()), NodeRole::Viewer, now);

        assert_eq!(roster.find_by_addr(test_addr()), Some(id1));

        let unknown: SocketAddr = "192.168.1.1:9999".parse().unwrap();
        assert_eq!(roster.find_by_addr(unknown), None);
    }

    #[test]
    fn test_silent_players() {
        let mut roster = Roster::new();
        let now = Instant::now();

        let master = roster.add_player("alice", None, NodeRole::Master, now);
        let quiet = roster.add_player("bob", Some(test_addr()), NodeRole::Normal, now);
        let chatty = roster.add_player("carol", Some(test_addr2()), NodeRole::Normal, now);

        let later = now + Duration::from_secs(3);
        roster.touch(chatty, later);

        let silent = roster.silent_players(later, Duration::from_secs(2), Some(master));
        assert_eq!(silent, vec![quiet]);
    }

    #[test]
    fn test_from_players_resumes_id_allocation() {
        let players = vec![
            Player::new(4, "dave", NodeRole::Master),
            Player::new(9, "erin", NodeRole::Normal),
        ];
        let roster = Roster::from_players(players, Instant::now());

        assert_eq!(roster.len(), 2);
        assert_eq!(roster.next_id(), 10);
    }

    #[test]
    fn test_role_queries_skip_unreachable_and_excluded() {
        let mut roster = Roster::new();
        let now = Instant::now();

        let me = roster.add_player("alice", None, NodeRole::Normal, now);
        let other = roster.add_player("bob", Some(test_addr()), NodeRole::Normal, now);

        assert_eq!(roster.with_role(NodeRole::Normal, Some(other)).map(|p| p.id), Some(me));
        assert_eq!(
            roster.reachable_with_role(NodeRole::Normal, None).map(|p| p.id),
            Some(other)
        );
        assert!(roster.reachable_with_role(NodeRole::Normal, Some(other)).is_none());
        assert_eq!(roster.peer_addrs(Some(me)), vec![(other, test_addr())]);
    }
}
