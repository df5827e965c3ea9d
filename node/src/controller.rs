//! Role and election controller
//!
//! The controller owns everything a node knows about its session: its own
//! role, the game state (authoritative or replicated), the reliable-messaging
//! ledger and the discovery registry. It performs no I/O. Callers feed it
//! inbound messages, local commands and timer ticks together with the current
//! time, then drain the datagrams it wants sent and the events it raised.
//!
//! Role changes of this node always go through [`Phase::apply`], so the
//! transition table in [`crate::role`] is the single source of truth for
//! which moves are legal.

use crate::discovery::{GameInfo, Registry};
use crate::error::{NodeError, Result};
use crate::messaging::{Messenger, Outgoing};
use crate::role::{Phase, Trigger};
use crate::simulation::Simulation;
use crate::state::GameState;
use log::{debug, info, warn};
use shared::{
    Direction, GameAnnouncement, GameConfig, GameMessage, NodeRole, Payload, PlayerId,
    PlayerSummary, SnakeState, StateSnapshot,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

/// Something an observer such as a renderer may want to know about.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    /// The master admitted this node under `player_id`.
    Joined { player_id: PlayerId },
    StateUpdated(StateSnapshot),
    RoleChanged {
        from: Option<NodeRole>,
        to: NodeRole,
    },
    /// An Error message from a peer.
    Error(String),
    GamesUpdated(Vec<GameInfo>),
    SessionEnded(String),
}

pub struct Controller {
    phase: Phase,
    my_id: Option<PlayerId>,
    player_name: String,
    game_name: String,
    config: GameConfig,
    state: Option<GameState>,
    master_addr: Option<SocketAddr>,
    deputy_addr: Option<SocketAddr>,
    last_master_activity: Instant,
    /// Latest heading requested by each player since the previous tick
    pending_moves: HashMap<PlayerId, Direction>,
    /// Highest Steer sequence accepted from each player
    last_steer_seq: HashMap<PlayerId, u64>,
    /// Highest RoleChange sequence accepted from each peer address
    last_role_change_seq: HashMap<SocketAddr, u64>,
    join_seq: Option<u64>,
    messenger: Messenger,
    registry: Registry,
    simulation: Simulation,
    events: Vec<NodeEvent>,
}

impl Controller {
    pub fn new(player_name: impl Into<String>) -> Self {
        Self::with_simulation(player_name, Simulation::new())
    }

    /// A controller whose simulation randomness is supplied by the caller.
    pub fn with_simulation(player_name: impl Into<String>, simulation: Simulation) -> Self {
        Self {
            phase: Phase::Idle,
            my_id: None,
            player_name: player_name.into(),
            game_name: String::new(),
            config: GameConfig::default(),
            state: None,
            master_addr: None,
            deputy_addr: None,
            last_master_activity: Instant::now(),
            pending_moves: HashMap::new(),
            last_steer_seq: HashMap::new(),
            last_role_change_seq: HashMap::new(),
            join_seq: None,
            messenger: Messenger::new(),
            registry: Registry::new(),
            simulation,
            events: Vec::new(),
        }
    }

    // ---- local operations ----

    /// Starts a new session with this node as master and its first player.
    pub fn host(
        &mut self,
        game_name: impl Into<String>,
        config: GameConfig,
        now: Instant,
    ) -> Result<PlayerId> {
        self.phase.apply(Trigger::HostStarted)?;

        let mut state = GameState::new(config);
        let id = state.players.next_id();
        let snake = self
            .simulation
            .create_snake_for_player(&mut state, id)
            .ok_or(NodeError::NoFreeRegion)?;
        state
            .players
            .add_player(&self.player_name, None, NodeRole::Master, now);
        state.snakes.insert(id, snake);
        self.simulation.spawn_food(&mut state);

        self.game_name = game_name.into();
        self.config = config;
        self.my_id = Some(id);
        self.state = Some(state);
        self.transition(Trigger::HostStarted)?;
        info!(
            "Hosting '{}' on a {}x{} board as player {}",
            self.game_name,
            config.width(),
            config.height(),
            id
        );
        Ok(id)
    }

    /// Asks the master at `master` to admit this node in `requested_role`
    ///
    /// The node enters the requested role right away; a rejection from the
    /// master ends the session.
    pub fn join(
        &mut self,
        master: SocketAddr,
        game_name: impl Into<String>,
        config: GameConfig,
        requested_role: NodeRole,
        now: Instant,
    ) -> Result<()> {
        self.phase.apply(Trigger::JoinRequested(requested_role))?;

        self.game_name = game_name.into();
        self.config = config;
        self.master_addr = Some(master);
        self.last_master_activity = now;

        let join = GameMessage::new(Payload::Join {
            player_name: self.player_name.clone(),
            game_name: self.game_name.clone(),
            requested_role,
        });
        self.join_seq = Some(self.messenger.send(master, join, now));
        self.transition(Trigger::JoinRequested(requested_role))?;
        info!(
            "Joining '{}' at {} as {}",
            self.game_name, master, requested_role
        );
        Ok(())
    }

    /// Joins a session previously seen in an announcement.
    pub fn join_game(
        &mut self,
        game_name: &str,
        requested_role: NodeRole,
        now: Instant,
    ) -> Result<()> {
        let info = self
            .registry
            .find(game_name)
            .cloned()
            .ok_or_else(|| NodeError::GameNotFound(game_name.to_string()))?;
        self.join(info.master_addr, info.name, info.config, requested_role, now)
    }

    /// Requests a new heading for this node's snake.
    pub fn steer(&mut self, direction: Direction, now: Instant) {
        match self.phase.role() {
            Some(NodeRole::Master) => {
                if let Some(id) = self.my_id {
                    self.pending_moves.insert(id, direction);
                }
            }
            Some(NodeRole::Normal) | Some(NodeRole::Deputy) => {
                let Some(master) = self.master_addr else {
                    return;
                };
                let master_id = self.master_player_id();
                let message = GameMessage::new(Payload::Steer { direction })
                    .from_player(self.my_id)
                    .to_player(master_id);
                self.messenger.send(master, message, now);
            }
            _ => debug!("Ignoring steer while {:?}", self.phase),
        }
    }

    /// Leaves the session
    ///
    /// A master hands its role to a successor first; everyone else tells the
    /// master it is stepping down to viewer.
    pub fn leave(&mut self, now: Instant) -> Result<()> {
        self.phase.apply(Trigger::Leave)?;

        if self.phase.is_master() {
            if let (Some(state), Some(me)) = (self.state.as_mut(), self.my_id) {
                if let Some(player) = state.players.get_mut(me) {
                    player.role = NodeRole::Viewer;
                }
                if let Some(snake) = state.snakes.get_mut(&me) {
                    snake.state = SnakeState::Zombie;
                }
            }
            if self.hand_over(now).is_none() {
                info!("No successor available; session ends with this master");
            }
        } else if let Some(master) = self.master_addr {
            let message = GameMessage::new(Payload::RoleChange {
                sender_role: Some(NodeRole::Viewer),
                receiver_role: None,
            })
            .from_player(self.my_id)
            .to_player(self.master_player_id());
            self.messenger.send(master, message, now);
        }

        self.transition(Trigger::Leave)?;
        self.events
            .push(NodeEvent::SessionEnded("left the session".to_string()));
        Ok(())
    }

    /// Sends a discovery probe to `target`, or to the multicast group and
    /// the local broadcast address when no target is given.
    pub fn discover(&mut self, target: Option<SocketAddr>, now: Instant) {
        let probe = GameMessage::new(Payload::Discover).from_player(self.my_id);
        match target {
            Some(addr) => {
                self.messenger.send(addr, probe, now);
            }
            None => {
                self.messenger.multicast(probe.clone());
                self.messenger.broadcast(probe);
            }
        }
    }

    // ---- inbound messages ----

    /// Dispatches one inbound message
    ///
    /// Errors describe why a message was refused; they never leave the
    /// controller in a partially updated state and the caller can keep
    /// dispatching.
    pub fn handle_message(
        &mut self,
        message: GameMessage,
        from: SocketAddr,
        now: Instant,
    ) -> Result<()> {
        if self.phase == Phase::Terminated {
            // Only the ledger outlives the session.
            if message.payload == Payload::Ack {
                self.messenger.on_ack(message.msg_seq);
            }
            return Ok(());
        }
        debug!(
            "<- {} {} seq={}",
            from,
            message.payload.kind(),
            message.msg_seq
        );

        if let (Some(state), Some(sender)) = (self.state.as_mut(), message.sender_id) {
            state.players.touch(sender, now);
        }
        if self.master_addr == Some(from) {
            self.last_master_activity = now;
        }

        let GameMessage {
            msg_seq: seq,
            sender_id,
            receiver_id,
            payload,
        } = message;

        match payload {
            Payload::Join {
                player_name,
                game_name,
                requested_role,
            } => self.handle_join(seq, from, &player_name, &game_name, requested_role, now),
            Payload::Steer { direction } => {
                self.handle_steer(seq, sender_id, from, direction);
                Ok(())
            }
            Payload::State { state } => {
                self.handle_state(seq, sender_id, receiver_id, from, state, now);
                Ok(())
            }
            Payload::Ack => {
                self.handle_ack(seq, receiver_id, from);
                Ok(())
            }
            Payload::Ping => {
                if self.phase.is_active() {
                    self.messenger
                        .reply(from, GameMessage::ack(seq, self.my_id, sender_id));
                }
                Ok(())
            }
            Payload::RoleChange {
                sender_role,
                receiver_role,
            } => self.handle_role_change(seq, sender_id, from, sender_role, receiver_role, now),
            Payload::Error { message } => {
                self.handle_error(seq, message);
                Ok(())
            }
            Payload::Discover => {
                if let Some(announcement) = self.announcement() {
                    let reply = GameMessage::new(Payload::Announcement {
                        games: vec![announcement],
                    })
                    .from_player(self.my_id);
                    self.messenger.send(from, reply, now);
                }
                Ok(())
            }
            Payload::Announcement { games } => {
                let mut discovered = false;
                for game in &games {
                    discovered |= self.registry.observe(game, from, now);
                }
                if discovered {
                    self.events.push(NodeEvent::GamesUpdated(self.registry.list()));
                }
                Ok(())
            }
        }
    }

    fn handle_join(
        &mut self,
        seq: u64,
        from: SocketAddr,
        player_name: &str,
        game_name: &str,
        requested_role: NodeRole,
        now: Instant,
    ) -> Result<()> {
        if !self.phase.is_master() {
            debug!("Ignoring join from {}: not master", from);
            return Ok(());
        }
        let Some(state) = self.state.as_mut() else {
            return Ok(());
        };

        if let Some(existing) = state.players.find_by_addr(from) {
            debug!("Repeated join from {}; already player {}", from, existing);
            self.messenger
                .reply(from, GameMessage::ack(seq, self.my_id, Some(existing)));
            self.send_state_to(existing, from, now);
            return Ok(());
        }

        let rejection = if !matches!(requested_role, NodeRole::Normal | NodeRole::Viewer) {
            Some(format!("Cannot join as {}", requested_role))
        } else if game_name != self.game_name {
            Some(format!("No game named '{}' here", game_name))
        } else {
            None
        };
        if let Some(reason) = rejection {
            return self.reject_join(seq, from, reason);
        }

        let id = state.players.next_id();
        let snake = if requested_role == NodeRole::Normal {
            match self.simulation.create_snake_for_player(state, id) {
                Some(snake) => Some(snake),
                None => return self.reject_join(seq, from, "No room for new snake".to_string()),
            }
        } else {
            None
        };

        let id = state
            .players
            .add_player(player_name, Some(from), requested_role, now);
        if let Some(snake) = snake {
            state.snakes.insert(id, snake);
        }

        self.messenger
            .reply(from, GameMessage::ack(seq, self.my_id, Some(id)));
        self.send_state_to(id, from, now);
        self.ensure_deputy(now);
        Ok(())
    }

    fn reject_join(&mut self, seq: u64, from: SocketAddr, reason: String) -> Result<()> {
        warn!("Rejecting join from {}: {}", from, reason);
        self.messenger
            .reply(from, GameMessage::error(seq, reason.clone()).from_player(self.my_id));
        Err(NodeError::JoinRejected(reason))
    }

    fn handle_steer(
        &mut self,
        seq: u64,
        sender_id: Option<PlayerId>,
        from: SocketAddr,
        direction: Direction,
    ) {
        if !self.phase.is_master() {
            return;
        }
        let player_id = sender_id.or_else(|| {
            self.state
                .as_ref()
                .and_then(|state| state.players.find_by_addr(from))
        });

        if let Some(player_id) = player_id {
            let last = self.last_steer_seq.get(&player_id).copied();
            if last.map_or(true, |last| seq > last) {
                self.last_steer_seq.insert(player_id, seq);
                self.pending_moves.insert(player_id, direction);
            } else {
                debug!("Dropping stale steer seq={} from {}", seq, player_id);
            }
        }
        self.messenger
            .reply(from, GameMessage::ack(seq, self.my_id, player_id));
    }

    fn handle_state(
        &mut self,
        seq: u64,
        sender_id: Option<PlayerId>,
        receiver_id: Option<PlayerId>,
        from: SocketAddr,
        snapshot: StateSnapshot,
        now: Instant,
    ) {
        if self.phase.is_master() || !self.phase.is_active() {
            debug!("Ignoring state from {} while {:?}", from, self.phase);
            return;
        }

        let held = self.state.as_ref().map(|state| state.state_order);
        if held.map_or(true, |held| snapshot.state_order > held) {
            let mut state = GameState::from_snapshot(self.config, snapshot, now);

            // The sender never lists its own address; a master that just
            // stepped down is already a viewer in its final snapshot.
            let master_id = state
                .players
                .with_role(NodeRole::Master, None)
                .filter(|p| p.address.is_none())
                .map(|p| p.id);
            for id in [master_id, sender_id].into_iter().flatten() {
                if let Some(player) = state.players.get_mut(id) {
                    if player.address.is_none() && Some(id) != self.my_id {
                        player.address = Some(from);
                    }
                }
            }
            self.deputy_addr = state
                .players
                .with_role(NodeRole::Deputy, None)
                .and_then(|p| p.address);

            if self.master_addr != Some(from) {
                if let Some(old) = self.master_addr {
                    self.messenger.redirect(old, from);
                }
                self.master_addr = Some(from);
            }
            self.last_master_activity = now;

            if self.my_id.is_none() {
                if let Some(id) = receiver_id {
                    self.learn_id(id);
                }
            }

            self.events.push(NodeEvent::StateUpdated(state.snapshot()));
            self.state = Some(state);
        } else {
            debug!("Ignoring state order {:?} <= {:?}", snapshot.state_order, held);
        }

        self.messenger
            .reply(from, GameMessage::ack(seq, self.my_id, None));
    }

    fn handle_ack(&mut self, seq: u64, receiver_id: Option<PlayerId>, from: SocketAddr) {
        self.messenger.on_ack(seq);

        if self.my_id.is_none() && self.join_seq == Some(seq) && self.master_addr == Some(from) {
            if let Some(id) = receiver_id {
                self.learn_id(id);
            }
        }
    }

    fn learn_id(&mut self, id: PlayerId) {
        info!("Admitted as player {}", id);
        self.my_id = Some(id);
        self.join_seq = None;
        self.events.push(NodeEvent::Joined { player_id: id });
    }

    fn handle_error(&mut self, seq: u64, message: String) {
        warn!("Peer reported error: {}", message);
        self.messenger.on_ack(seq);
        self.events.push(NodeEvent::Error(message.clone()));

        if self.my_id.is_none() && self.join_seq == Some(seq) {
            self.end_session(format!("join rejected: {}", message));
        }
    }

    fn handle_role_change(
        &mut self,
        seq: u64,
        sender_id: Option<PlayerId>,
        from: SocketAddr,
        sender_role: Option<NodeRole>,
        receiver_role: Option<NodeRole>,
        now: Instant,
    ) -> Result<()> {
        let last = self.last_role_change_seq.get(&from).copied();
        let outcome = if last.map_or(true, |last| seq > last) {
            self.last_role_change_seq.insert(from, seq);
            self.apply_role_change(sender_id, from, sender_role, receiver_role, now)
        } else {
            debug!("Dropping stale role change seq={} from {}", seq, from);
            Ok(())
        };
        if sender_id.is_some() {
            self.messenger
                .reply(from, GameMessage::ack(seq, self.my_id, sender_id));
        }
        outcome
    }

    fn apply_role_change(
        &mut self,
        sender_id: Option<PlayerId>,
        from: SocketAddr,
        sender_role: Option<NodeRole>,
        receiver_role: Option<NodeRole>,
        now: Instant,
    ) -> Result<()> {
        if let (Some(state), Some(id)) = (self.state.as_mut(), sender_id) {
            if let Some(player) = state.players.get_mut(id) {
                if player.address.is_none() && Some(id) != self.my_id {
                    player.address = Some(from);
                }
            }
        }

        if sender_role == Some(NodeRole::Master) && !self.phase.is_master() {
            if let Some(old) = self.master_addr.filter(|old| *old != from) {
                info!("Master moved from {} to {}", old, from);
                self.messenger.redirect(old, from);
            }
            self.master_addr = Some(from);
            self.last_master_activity = now;
        }

        match receiver_role {
            Some(NodeRole::Master) => {
                if !self.phase.is_master() {
                    self.assume_mastership(Trigger::Assigned(NodeRole::Master), now)?;
                }
            }
            Some(role) => {
                if self.phase.role() != Some(role) {
                    self.transition(Trigger::Assigned(role))?;
                }
            }
            None => {
                if sender_role == Some(NodeRole::Viewer) && self.phase.is_master() {
                    self.player_left(sender_id, from, now);
                }
            }
        }
        Ok(())
    }

    /// Turns a departing player into a viewer and leaves its snake behind.
    fn player_left(&mut self, sender_id: Option<PlayerId>, from: SocketAddr, now: Instant) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        let Some(id) = sender_id.or_else(|| state.players.find_by_addr(from)) else {
            return;
        };
        if let Some(player) = state.players.get_mut(id) {
            if player.role == NodeRole::Deputy {
                self.deputy_addr = None;
            }
            player.role = NodeRole::Viewer;
            info!("Player {} left; now a viewer", id);
        }
        if let Some(snake) = state.snakes.get_mut(&id) {
            snake.state = SnakeState::Zombie;
        }
        self.ensure_deputy(now);
    }

    // ---- master duties ----

    /// Takes over as master using the latest replicated state
    fn assume_mastership(&mut self, trigger: Trigger, now: Instant) -> Result<()> {
        self.phase.apply(trigger)?;
        let me = self.my_id.ok_or(NodeError::NoAuthoritativeNode)?;
        let old_master = self.master_addr;
        let state = self.state.as_mut().ok_or(NodeError::NoAuthoritativeNode)?;

        let previous: Vec<PlayerId> = state
            .players
            .iter()
            .filter(|p| p.role == NodeRole::Master && p.id != me)
            .map(|p| p.id)
            .collect();
        for id in previous {
            if let Some(player) = state.players.get_mut(id) {
                player.role = NodeRole::Viewer;
                if player.address.is_none() {
                    player.address = old_master;
                }
            }
            if let Some(snake) = state.snakes.get_mut(&id) {
                snake.state = SnakeState::Zombie;
            }
        }
        if let Some(player) = state.players.get_mut(me) {
            player.role = NodeRole::Master;
            player.address = None;
        }
        state.players.touch_all(now);
        let peers = state.players.peer_addrs(Some(me));

        self.pending_moves.clear();
        self.last_steer_seq.clear();
        self.master_addr = None;
        self.deputy_addr = None;
        self.transition(trigger)?;
        info!("Player {} is now master", me);

        for (id, addr) in peers {
            let message = GameMessage::new(Payload::RoleChange {
                sender_role: Some(NodeRole::Master),
                receiver_role: None,
            })
            .from_player(Some(me))
            .to_player(Some(id));
            self.messenger.send(addr, message, now);
        }
        self.ensure_deputy(now);
        Ok(())
    }

    /// Makes sure some reachable NORMAL player is deputy
    fn ensure_deputy(&mut self, now: Instant) {
        if !self.phase.is_master() {
            return;
        }
        let Some(state) = self.state.as_mut() else {
            return;
        };

        if let Some(deputy) = state.players.with_role(NodeRole::Deputy, self.my_id) {
            self.deputy_addr = deputy.address;
            return;
        }
        let Some((id, addr)) = state
            .players
            .reachable_with_role(NodeRole::Normal, self.my_id)
            .and_then(|p| p.address.map(|addr| (p.id, addr)))
        else {
            self.deputy_addr = None;
            return;
        };

        if let Some(player) = state.players.get_mut(id) {
            player.role = NodeRole::Deputy;
        }
        self.deputy_addr = Some(addr);
        info!("Player {} at {} assigned deputy", id, addr);

        let message = GameMessage::new(Payload::RoleChange {
            sender_role: Some(NodeRole::Master),
            receiver_role: Some(NodeRole::Deputy),
        })
        .from_player(self.my_id)
        .to_player(Some(id));
        self.messenger.send(addr, message, now);
    }

    /// Hands the master role to the deputy, or failing that to any reachable
    /// NORMAL player. Returns the successor's id.
    fn hand_over(&mut self, now: Instant) -> Option<PlayerId> {
        let state = self.state.as_mut()?;
        let (id, addr) = state
            .players
            .reachable_with_role(NodeRole::Deputy, self.my_id)
            .or_else(|| state.players.reachable_with_role(NodeRole::Normal, self.my_id))
            .and_then(|p| p.address.map(|addr| (p.id, addr)))?;

        if let Some(player) = state.players.get_mut(id) {
            player.role = NodeRole::Master;
        }
        info!("Handing master role to player {} at {}", id, addr);

        let message = GameMessage::new(Payload::RoleChange {
            sender_role: Some(NodeRole::Viewer),
            receiver_role: Some(NodeRole::Master),
        })
        .from_player(self.my_id)
        .to_player(Some(id));
        self.messenger.send(addr, message, now);

        self.master_addr = Some(addr);
        self.deputy_addr = None;
        self.last_master_activity = now;
        Some(id)
    }

    /// Runs one simulation step and publishes the result
    pub fn on_tick(&mut self, now: Instant) -> Result<()> {
        if !self.phase.is_master() {
            return Ok(());
        }
        let Some(state) = self.state.as_mut() else {
            return Ok(());
        };

        let dead = self.simulation.tick(state, &self.pending_moves);
        self.pending_moves.clear();

        let mut i_died = false;
        let mut demoted = Vec::new();
        for id in dead {
            if Some(id) == self.my_id {
                i_died = true;
                continue;
            }
            if let Some(player) = state.players.get_mut(id) {
                if player.role == NodeRole::Viewer {
                    continue;
                }
                if player.role == NodeRole::Deputy {
                    self.deputy_addr = None;
                }
                player.role = NodeRole::Viewer;
                info!("Player {} died; now a viewer", id);
                if let Some(addr) = player.address {
                    demoted.push((id, addr));
                }
            }
        }

        for (id, addr) in demoted {
            let message = GameMessage::new(Payload::RoleChange {
                sender_role: Some(NodeRole::Master),
                receiver_role: Some(NodeRole::Viewer),
            })
            .from_player(self.my_id)
            .to_player(Some(id));
            self.messenger.send(addr, message, now);
        }

        if i_died {
            self.on_own_death(now)?;
        } else {
            self.ensure_deputy(now);
            self.broadcast_state(now);
        }

        if let Some(snapshot) = self.snapshot() {
            self.events.push(NodeEvent::StateUpdated(snapshot));
        }
        Ok(())
    }

    fn on_own_death(&mut self, now: Instant) -> Result<()> {
        self.transition(Trigger::OwnSnakeDied)?;
        if let (Some(state), Some(me)) = (self.state.as_mut(), self.my_id) {
            if let Some(player) = state.players.get_mut(me) {
                player.role = NodeRole::Viewer;
            }
        }
        info!("Own snake died; stepping down");

        self.broadcast_state(now);
        if self.hand_over(now).is_none() {
            self.end_session(NodeError::NoAuthoritativeNode.to_string());
        }
        Ok(())
    }

    fn broadcast_state(&mut self, now: Instant) {
        let Some(state) = self.state.as_ref() else {
            return;
        };
        let snapshot = state.snapshot();
        for (id, addr) in state.players.peer_addrs(self.my_id) {
            let message = GameMessage::new(Payload::State {
                state: snapshot.clone(),
            })
            .from_player(self.my_id)
            .to_player(Some(id));
            self.messenger.send(addr, message, now);
        }
    }

    fn send_state_to(&mut self, id: PlayerId, addr: SocketAddr, now: Instant) {
        if let Some(snapshot) = self.snapshot() {
            let message = GameMessage::new(Payload::State { state: snapshot })
                .from_player(self.my_id)
                .to_player(Some(id));
            self.messenger.send(addr, message, now);
        }
    }

    /// Announcement describing the session, if this node is its master.
    pub fn announcement(&self) -> Option<GameAnnouncement> {
        if !self.phase.is_master() {
            return None;
        }
        let state = self.state.as_ref()?;
        Some(GameAnnouncement {
            game_name: self.game_name.clone(),
            players: state
                .players
                .iter()
                .filter(|p| p.role != NodeRole::Viewer)
                .map(|p| PlayerSummary {
                    id: p.id,
                    name: p.name.clone(),
                    role: p.role,
                    score: p.score,
                })
                .collect(),
            config: state.config,
            can_join: state.has_free_square(),
        })
    }

    /// Multicasts the session announcement.
    pub fn announce(&mut self) {
        if let Some(announcement) = self.announcement() {
            let message = GameMessage::new(Payload::Announcement {
                games: vec![announcement],
            })
            .from_player(self.my_id);
            self.messenger.multicast(message);
        }
    }

    // ---- timers ----

    /// Retransmits, expires and checks peers for silence
    pub fn on_timer(&mut self, now: Instant) -> Result<()> {
        self.messenger
            .reconcile(now, self.config.retry_interval(), self.config.abandon_after());

        match self.phase.role() {
            Some(NodeRole::Master) => self.expire_players(now),
            Some(NodeRole::Deputy) if self.master_is_silent(now) => {
                info!("Master silent for {:?}; taking over", self.config.master_silence());
                self.assume_mastership(Trigger::MasterSilent, now)?;
            }
            Some(NodeRole::Normal) | Some(NodeRole::Viewer) if self.master_is_silent(now) => {
                if let Some(deputy) = self.deputy_addr.filter(|d| Some(*d) != self.master_addr) {
                    info!("Master silent; following deputy at {}", deputy);
                    if let Some(old) = self.master_addr {
                        self.messenger.redirect(old, deputy);
                    }
                    self.master_addr = Some(deputy);
                    self.last_master_activity = now;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn master_is_silent(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_master_activity) > self.config.master_silence()
    }

    fn expire_players(&mut self, now: Instant) {
        let timeout = self.config.player_timeout();
        let Some(state) = self.state.as_mut() else {
            return;
        };

        let silent = state.players.silent_players(now, timeout, self.my_id);
        if silent.is_empty() {
            return;
        }
        for id in silent {
            let role = state.players.get(id).map(|p| p.role);
            match role {
                Some(NodeRole::Viewer) => {
                    info!("Viewer {} timed out; removing", id);
                    state.players.remove_player(id);
                }
                Some(role) => {
                    info!("Player {} ({}) timed out; now a viewer", id, role);
                    if role == NodeRole::Deputy {
                        self.deputy_addr = None;
                    }
                    if let Some(player) = state.players.get_mut(id) {
                        player.role = NodeRole::Viewer;
                    }
                    if let Some(snake) = state.snakes.get_mut(&id) {
                        snake.state = SnakeState::Zombie;
                    }
                }
                None => {}
            }
        }
        self.ensure_deputy(now);
    }

    /// Drops lobby entries that stopped announcing.
    pub fn refresh_discovery(&mut self, now: Instant) {
        if self.registry.evict_stale(now) {
            self.events.push(NodeEvent::GamesUpdated(self.registry.list()));
        }
    }

    // ---- helpers ----

    fn transition(&mut self, trigger: Trigger) -> Result<()> {
        let from = self.phase.role();
        self.phase = self.phase.apply(trigger)?;
        if let Some(to) = self.phase.role() {
            if from != Some(to) {
                match from {
                    Some(from) => info!("Role {} -> {}", from, to),
                    None => info!("Role {}", to),
                }
                self.events.push(NodeEvent::RoleChanged { from, to });
            }
        }
        Ok(())
    }

    fn end_session(&mut self, reason: String) {
        if let Ok(next) = self.phase.apply(Trigger::SessionEnded) {
            self.phase = next;
        }
        warn!("Session ended: {}", reason);
        self.events.push(NodeEvent::SessionEnded(reason));
    }

    fn master_player_id(&self) -> Option<PlayerId> {
        self.state
            .as_ref()
            .and_then(|state| state.players.with_role(NodeRole::Master, None))
            .map(|p| p.id)
    }

    pub fn drain_outgoing(&mut self) -> Vec<Outgoing> {
        self.messenger.drain()
    }

    pub fn drain_events(&mut self) -> Vec<NodeEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn role(&self) -> Option<NodeRole> {
        self.phase.role()
    }

    pub fn is_master(&self) -> bool {
        self.phase.is_master()
    }

    pub fn my_id(&self) -> Option<PlayerId> {
        self.my_id
    }

    pub fn master_addr(&self) -> Option<SocketAddr> {
        self.master_addr
    }

    pub fn deputy_addr(&self) -> Option<SocketAddr> {
        self.deputy_addr
    }

    pub fn config(&self) -> GameConfig {
        self.config
    }

    pub fn state(&self) -> Option<&GameState> {
        self.state.as_ref()
    }

    pub fn snapshot(&self) -> Option<StateSnapshot> {
        self.state.as_ref().map(GameState::snapshot)
    }

    pub fn games(&self) -> Vec<GameInfo> {
        self.registry.list()
    }

    pub fn pending_len(&self) -> usize {
        self.messenger.pending_len()
    }
}
