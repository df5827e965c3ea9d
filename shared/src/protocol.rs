use crate::config::GameConfig;
use crate::coord::{Coord, Direction};
use crate::snake::Snake;
use crate::PlayerId;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeRole {
    Normal,
    Master,
    Deputy,
    Viewer,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NodeRole::Normal => "NORMAL",
            NodeRole::Master => "MASTER",
            NodeRole::Deputy => "DEPUTY",
            NodeRole::Viewer => "VIEWER",
        };
        f.write_str(name)
    }
}

/// A participant as it is replicated to every node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    /// Where the master reaches this player. `None` for the master itself.
    pub address: Option<SocketAddr>,
    pub role: NodeRole,
    pub score: u32,
}

impl Player {
    pub fn new(id: PlayerId, name: impl Into<String>, role: NodeRole) -> Self {
        Self {
            id,
            name: name.into(),
            address: None,
            role,
            score: 0,
        }
    }
}

/// Full authoritative game state as broadcast by the master every tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub state_order: u32,
    pub snakes: Vec<Snake>,
    pub foods: Vec<Coord>,
    pub players: Vec<Player>,
}

/// Player entry of a session announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSummary {
    pub id: PlayerId,
    pub name: String,
    pub role: NodeRole,
    pub score: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameAnnouncement {
    pub game_name: String,
    /// Non-viewer players only.
    pub players: Vec<PlayerSummary>,
    pub config: GameConfig,
    pub can_join: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    Ping,
    Steer {
        direction: Direction,
    },
    Ack,
    State {
        state: StateSnapshot,
    },
    Announcement {
        games: Vec<GameAnnouncement>,
    },
    Discover,
    Join {
        player_name: String,
        game_name: String,
        requested_role: NodeRole,
    },
    Error {
        message: String,
    },
    RoleChange {
        sender_role: Option<NodeRole>,
        receiver_role: Option<NodeRole>,
    },
}

impl Payload {
    /// Whether the sender keeps the message in its ledger until acknowledged.
    /// Acks, discovery probes and announcements are fire-and-forget.
    pub fn needs_ack(&self) -> bool {
        !matches!(
            self,
            Payload::Ack | Payload::Discover | Payload::Announcement { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Ping => "Ping",
            Payload::Steer { .. } => "Steer",
            Payload::Ack => "Ack",
            Payload::State { .. } => "State",
            Payload::Announcement { .. } => "Announcement",
            Payload::Discover => "Discover",
            Payload::Join { .. } => "Join",
            Payload::Error { .. } => "Error",
            Payload::RoleChange { .. } => "RoleChange",
        }
    }
}

/// One datagram on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameMessage {
    pub msg_seq: u64,
    pub sender_id: Option<PlayerId>,
    pub receiver_id: Option<PlayerId>,
    pub payload: Payload,
}

impl GameMessage {
    /// A message whose sequence number is assigned when it is sent.
    pub fn new(payload: Payload) -> Self {
        Self {
            msg_seq: 0,
            sender_id: None,
            receiver_id: None,
            payload,
        }
    }

    pub fn from_player(mut self, sender_id: Option<PlayerId>) -> Self {
        self.sender_id = sender_id;
        self
    }

    pub fn to_player(mut self, receiver_id: Option<PlayerId>) -> Self {
        self.receiver_id = receiver_id;
        self
    }

    /// Acknowledgment echoing `msg_seq` of the message being confirmed.
    pub fn ack(msg_seq: u64, sender_id: Option<PlayerId>, receiver_id: Option<PlayerId>) -> Self {
        Self {
            msg_seq,
            sender_id,
            receiver_id,
            payload: Payload::Ack,
        }
    }

    /// Rejection echoing `msg_seq` of the offending request.
    pub fn error(msg_seq: u64, message: impl Into<String>) -> Self {
        Self {
            msg_seq,
            sender_id: None,
            receiver_id: None,
            payload: Payload::Error {
                message: message.into(),
            },
        }
    }
}

pub fn encode(message: &GameMessage) -> Result<Vec<u8>, bincode::Error> {
    bincode::serialize(message)
}

pub fn decode(bytes: &[u8]) -> Result<GameMessage, bincode::Error> {
    bincode::deserialize(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snake::SnakeState;

    fn sample_state() -> StateSnapshot {
        let mut master = Player::new(1, "alice", NodeRole::Master);
        master.score = 4;
        let mut deputy = Player::new(2, "bob", NodeRole::Deputy);
        deputy.address = Some("192.168.1.20:40000".parse().unwrap());

        StateSnapshot {
            state_order: 17,
            snakes: vec![
                Snake::new(1, Coord::new(3, 4), Direction::Left),
                Snake {
                    player_id: 2,
                    points: vec![Coord::new(9, 9), Coord::new(0, 3), Coord::new(-2, 0)],
                    head_direction: Direction::Up,
                    state: SnakeState::Zombie,
                },
            ],
            foods: vec![Coord::new(0, 0), Coord::new(5, 7)],
            players: vec![master, deputy],
        }
    }

    #[test]
    fn test_state_message_survives_codec() {
        let message = GameMessage {
            msg_seq: 99,
            sender_id: Some(1),
            receiver_id: Some(2),
            payload: Payload::State {
                state: sample_state(),
            },
        };

        let bytes = encode(&message).unwrap();
        assert_eq!(decode(&bytes).unwrap(), message);
    }

    #[test]
    fn test_fire_and_forget_payloads() {
        assert!(!Payload::Ack.needs_ack());
        assert!(!Payload::Discover.needs_ack());
        assert!(!Payload::Announcement { games: vec![] }.needs_ack());

        assert!(Payload::Ping.needs_ack());
        assert!(Payload::Steer {
            direction: Direction::Up
        }
        .needs_ack());
        assert!(Payload::RoleChange {
            sender_role: Some(NodeRole::Viewer),
            receiver_role: None,
        }
        .needs_ack());
    }

    #[test]
    fn test_ack_and_error_echo_sequence() {
        let ack = GameMessage::ack(41, Some(1), Some(7));
        assert_eq!(ack.msg_seq, 41);
        assert_eq!(ack.receiver_id, Some(7));
        assert_eq!(ack.payload, Payload::Ack);

        let error = GameMessage::error(12, "No room for new snake");
        assert_eq!(error.msg_seq, 12);
        assert_eq!(error.payload.kind(), "Error");
    }

    #[test]
    fn test_malformed_datagrams_are_rejected() {
        let valid = encode(&GameMessage::new(Payload::Join {
            player_name: "carol".to_string(),
            game_name: "snakes".to_string(),
            requested_role: NodeRole::Normal,
        }))
        .unwrap();

        // Truncated
        assert!(decode(&valid[..valid.len() / 2]).is_err());

        // Unknown payload tag
        let mut corrupted = GameMessage::new(Payload::Ping);
        corrupted.msg_seq = 1;
        let mut bytes = encode(&corrupted).unwrap();
        let tag = bytes.len() - 4;
        bytes[tag] = 0xFF;
        assert!(decode(&bytes).is_err());

        // Empty
        assert!(decode(&[]).is_err());
    }
}
