//! # Snake Session Node
//!
//! This library implements a single participant of a peer-to-peer snake
//! session. There is no dedicated server: whichever node currently holds the
//! MASTER role simulates the game and replicates it to everyone else, and a
//! standby DEPUTY takes over when the master goes quiet.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! The master advances the world once per tick: steering, movement, food,
//! collisions, scoring and food respawn. Every tick bumps the state order and
//! the resulting snapshot is sent to all peers.
//!
//! ### Replication
//! Non-master nodes never simulate. They adopt a snapshot only when its state
//! order is newer than the one they hold, which makes reordered or duplicated
//! datagrams harmless.
//!
//! ### Reliable Messaging
//! Datagrams carry per-node sequence numbers. Anything that needs an
//! acknowledgment stays in a ledger and is resent every tenth of a tick until
//! acknowledged or until it has been outstanding for five ticks.
//!
//! ### Election and Failover
//! Roles change only through a closed transition table. The master keeps a
//! deputy assigned at all times; on master silence the deputy promotes itself
//! and announces its new role, while plain players follow the deputy instead
//! of promoting themselves. A master whose snake dies hands its role over
//! before stepping down to viewer.
//!
//! ## Module Organization
//!
//! ### Roster (`roster`)
//! Player ids, addresses, roles and activity timestamps.
//!
//! ### Game State (`state`) and Simulation (`simulation`)
//! The world container with its free-space search, and the per-tick rules.
//!
//! ### Messaging (`messaging`)
//! Sequence numbers, the pending-message ledger and the outgoing queue.
//!
//! ### Discovery (`discovery`)
//! Sessions learned from announcements, evicted after three silent seconds.
//!
//! ### Roles (`role`) and Controller (`controller`)
//! The role state machine and the sans-IO controller that owns all of the
//! above and reacts to messages, commands and timers.
//!
//! ### Runtime (`node`, `transport`)
//! Tokio tasks and UDP sockets that feed the controller and put its
//! datagrams on the wire.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use node::{Controller, Node, NodeSettings};
//! use shared::GameConfig;
//! use std::time::Instant;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut controller = Controller::new("alice");
//!     controller.host("snakes", GameConfig::default(), Instant::now())?;
//!
//!     let settings = NodeSettings {
//!         discovery: true,
//!         ..NodeSettings::default()
//!     };
//!     let mut node = Node::bind(settings, controller).await?;
//!
//!     // Ticks, announces, answers joins and hands over on death until
//!     // the session ends for this node.
//!     node.run().await?;
//!     Ok(())
//! }
//! ```

pub mod controller;
pub mod discovery;
pub mod error;
pub mod messaging;
pub mod node;
pub mod role;
pub mod roster;
pub mod simulation;
pub mod state;
pub mod transport;

pub use controller::{Controller, NodeEvent};
pub use discovery::GameInfo;
pub use error::NodeError;
pub use node::{Command, Node, NodeHandle};
pub use role::{Phase, Trigger};
pub use transport::NodeSettings;
