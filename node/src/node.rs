//! Tokio runtime driving a [`Controller`] over UDP
//!
//! One owning task runs the controller. Helper tasks receive datagrams,
//! send queued datagrams and emit reconcile ticks; they talk to the owning
//! task through channels only.

use crate::controller::{Controller, NodeEvent};
use crate::discovery::GameInfo;
use crate::error::Result;
use crate::messaging::Outgoing;
use crate::role::Phase;
use crate::transport::{self, NodeSettings};
use log::{debug, error, info, warn};
use shared::{Direction, GameMessage, MAX_DATAGRAM};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// How often a master announces its session.
pub const ANNOUNCE_PERIOD: Duration = Duration::from_secs(1);
/// How often stale lobby entries are evicted.
pub const DISCOVERY_REFRESH: Duration = Duration::from_secs(1);

/// Messages delivered to the owning task
#[derive(Debug)]
pub enum NodeMessage {
    PacketReceived {
        message: GameMessage,
        addr: SocketAddr,
    },
    Command(Command),
    /// Time to retransmit and check for silent peers
    Reconcile,
    Shutdown,
}

/// Local player input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Steer(Direction),
    Leave,
}

/// Cloneable handle for feeding commands into a running node.
#[derive(Debug, Clone)]
pub struct NodeHandle {
    tx: mpsc::UnboundedSender<NodeMessage>,
}

impl NodeHandle {
    pub fn steer(&self, direction: Direction) -> bool {
        self.tx
            .send(NodeMessage::Command(Command::Steer(direction)))
            .is_ok()
    }

    pub fn leave(&self) -> bool {
        self.tx.send(NodeMessage::Command(Command::Leave)).is_ok()
    }

    pub fn shutdown(&self) -> bool {
        self.tx.send(NodeMessage::Shutdown).is_ok()
    }
}

pub struct Node {
    socket: Arc<UdpSocket>,
    multicast: Option<Arc<UdpSocket>>,
    settings: NodeSettings,
    controller: Controller,
    started: bool,

    // Communication channels
    node_tx: mpsc::UnboundedSender<NodeMessage>,
    node_rx: mpsc::UnboundedReceiver<NodeMessage>,
    out_tx: Option<mpsc::UnboundedSender<Outgoing>>,
    out_rx: Option<mpsc::UnboundedReceiver<Outgoing>>,
    events_tx: Option<mpsc::UnboundedSender<NodeEvent>>,
    sender_task: Option<JoinHandle<()>>,
}

impl Node {
    /// Binds the node's sockets
    ///
    /// Failing to join the multicast group is not fatal: the node keeps
    /// working and can still be reached directly.
    pub async fn bind(settings: NodeSettings, controller: Controller) -> Result<Self> {
        let socket = Arc::new(transport::bind_unicast(settings.bind).await?);

        let multicast = if settings.discovery {
            match transport::bind_multicast(settings.multicast_group, settings.multicast_port)
                .await
            {
                Ok(socket) => Some(Arc::new(socket)),
                Err(e) => {
                    warn!("Multicast discovery unavailable: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let (node_tx, node_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        Ok(Node {
            socket,
            multicast,
            settings,
            controller,
            started: false,
            node_tx,
            node_rx,
            out_tx: Some(out_tx),
            out_rx: Some(out_rx),
            events_tx: None,
            sender_task: None,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn handle(&self) -> NodeHandle {
        NodeHandle {
            tx: self.node_tx.clone(),
        }
    }

    /// Receives every [`NodeEvent`] raised from now on.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<NodeEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events_tx = Some(tx);
        rx
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut Controller {
        &mut self.controller
    }

    /// Spawns the socket tasks; later calls do nothing.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;

        Self::spawn_network_receiver(Arc::clone(&self.socket), self.node_tx.clone());
        if let Some(multicast) = &self.multicast {
            Self::spawn_network_receiver(Arc::clone(multicast), self.node_tx.clone());
        }
        self.spawn_network_sender();
    }

    /// Spawns task that continuously listens for incoming datagrams
    fn spawn_network_receiver(
        socket: Arc<UdpSocket>,
        node_tx: mpsc::UnboundedSender<NodeMessage>,
    ) {
        tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_DATAGRAM];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match transport::decode_datagram(&buffer[..len]) {
                        Ok(message) => {
                            if node_tx
                                .send(NodeMessage::PacketReceived { message, addr })
                                .is_err()
                            {
                                debug!("Node loop gone; receiver stopping");
                                break;
                            }
                        }
                        Err(e) => warn!("Dropping malformed datagram from {}: {}", addr, e),
                    },
                    Err(e) => {
                        error!("Error receiving datagram: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes the outgoing datagram queue
    fn spawn_network_sender(&mut self) {
        let Some(mut out_rx) = self.out_rx.take() else {
            return;
        };
        let socket = Arc::clone(&self.socket);
        let multicast_addr = self.settings.multicast_addr();
        let broadcast_addr = self.settings.broadcast_addr();

        let task = tokio::spawn(async move {
            while let Some(outgoing) = out_rx.recv().await {
                let (message, addr) = match outgoing {
                    Outgoing::Unicast { addr, message } => (message, addr),
                    Outgoing::Multicast { message } => (message, multicast_addr),
                    Outgoing::Broadcast { message } => (message, broadcast_addr),
                };
                if let Err(e) = transport::send_message(&socket, &message, addr).await {
                    error!(
                        "Failed to send {} to {}: {}",
                        message.payload.kind(),
                        addr,
                        e
                    );
                }
            }
        });
        self.sender_task = Some(task);
    }

    /// Spawns task that paces retransmission and silence checks
    ///
    /// The period comes from the session config, so this runs only once the
    /// controller has hosted or joined.
    fn spawn_timeout_checker(&self) {
        let node_tx = self.node_tx.clone();
        let period = self.controller.config().retry_interval();

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                if node_tx.send(NodeMessage::Reconcile).is_err() {
                    break;
                }
            }
        });
    }

    /// Hands queued datagrams to the sender and events to the subscriber.
    fn flush(&mut self) {
        let outgoing = self.controller.drain_outgoing();
        if let Some(out_tx) = &self.out_tx {
            for datagram in outgoing {
                if let Err(e) = out_tx.send(datagram) {
                    error!("Failed to queue datagram: {}", e);
                }
            }
        }

        for event in self.controller.drain_events() {
            if let Some(events_tx) = &self.events_tx {
                if events_tx.send(event).is_err() {
                    self.events_tx = None;
                    break;
                }
            }
        }
    }

    fn dispatch(&mut self, message: GameMessage, addr: SocketAddr) {
        let kind = message.payload.kind();
        if let Err(e) = self
            .controller
            .handle_message(message, addr, Instant::now())
        {
            warn!("Failed to handle {} from {}: {}", kind, addr, e);
        }
    }

    fn command(&mut self, command: Command) {
        let now = Instant::now();
        match command {
            Command::Steer(direction) => self.controller.steer(direction, now),
            Command::Leave => {
                if let Err(e) = self.controller.leave(now) {
                    warn!("Cannot leave: {}", e);
                }
            }
        }
    }

    /// Probes for sessions and collects announcements for `wait`
    ///
    /// With a `target` the probe goes straight to that address; otherwise to
    /// the multicast group and the local broadcast address.
    pub async fn discover(
        &mut self,
        wait: Duration,
        target: Option<SocketAddr>,
    ) -> Vec<GameInfo> {
        self.start();
        self.controller.discover(target, Instant::now());
        self.flush();

        let deadline = tokio::time::Instant::now() + wait;
        loop {
            match tokio::time::timeout_at(deadline, self.node_rx.recv()).await {
                Ok(Some(NodeMessage::PacketReceived { message, addr })) => {
                    self.dispatch(message, addr);
                    self.flush();
                }
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => break,
            }
        }
        self.controller.games()
    }

    /// Main node loop
    ///
    /// Returns once the session is over for this node and every message still
    /// in the ledger has been acknowledged or abandoned.
    pub async fn run(&mut self) -> Result<()> {
        self.start();
        self.spawn_timeout_checker();

        let period = self.controller.config().tick_period();
        let mut tick_interval = interval(period);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut announce_interval = interval(ANNOUNCE_PERIOD);
        let mut refresh_interval = interval(DISCOVERY_REFRESH);

        info!("Node running as {:?}", self.controller.phase());
        self.flush();
        let mut draining = false;

        loop {
            let was_master = self.controller.is_master();

            tokio::select! {
                message = self.node_rx.recv() => {
                    match message {
                        Some(NodeMessage::PacketReceived { message, addr }) => {
                            self.dispatch(message, addr);
                        }
                        Some(NodeMessage::Command(command)) => self.command(command),
                        Some(NodeMessage::Reconcile) => {
                            if let Err(e) = self.controller.on_timer(Instant::now()) {
                                warn!("Timer handling failed: {}", e);
                            }
                        }
                        Some(NodeMessage::Shutdown) | None => {
                            info!("Node shutting down");
                            break;
                        }
                    }
                },

                _ = tick_interval.tick(), if was_master => {
                    if let Err(e) = self.controller.on_tick(Instant::now()) {
                        warn!("Tick failed: {}", e);
                    }
                },

                _ = announce_interval.tick(), if was_master => {
                    self.controller.announce();
                },

                _ = refresh_interval.tick() => {
                    self.controller.refresh_discovery(Instant::now());
                },
            }

            if !was_master && self.controller.is_master() {
                tick_interval.reset();
                announce_interval.reset();
            }
            self.flush();

            if self.controller.phase() == Phase::Terminated {
                let pending = self.controller.pending_len();
                if pending == 0 {
                    info!("Session over; stopping node");
                    break;
                }
                if !draining {
                    info!("Session over; waiting on {} unacknowledged messages", pending);
                    draining = true;
                }
            }
        }

        self.finish().await;
        Ok(())
    }

    /// Lets the sender task put out whatever is still queued.
    async fn finish(&mut self) {
        self.out_tx = None;
        if let Some(task) = self.sender_task.take() {
            if tokio::time::timeout(Duration::from_secs(1), task)
                .await
                .is_err()
            {
                warn!("Sender did not drain in time");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{decode, encode, GameConfig, NodeRole, Payload};
    use tokio_test::assert_ok;

    fn loopback() -> NodeSettings {
        NodeSettings {
            bind: "127.0.0.1:0".parse().unwrap(),
            ..NodeSettings::default()
        }
    }

    async fn hosted_node(name: &str) -> Node {
        let mut controller = Controller::new(name);
        controller
            .host("snakes", GameConfig::new(20, 20, 1, 100), Instant::now())
            .unwrap();
        Node::bind(loopback(), controller).await.unwrap()
    }

    #[test]
    fn test_node_message_creation() {
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let message = NodeMessage::PacketReceived {
            message: GameMessage::new(Payload::Ping),
            addr,
        };

        match message {
            NodeMessage::PacketReceived { message, addr: a } => {
                assert_eq!(a, addr);
                assert_eq!(message.payload, Payload::Ping);
            }
            _ => panic!("Expected PacketReceived"),
        }
    }

    #[tokio::test]
    async fn test_handle_delivers_commands() {
        let node = hosted_node("alice").await;
        let handle = node.handle();
        let mut rx = node.node_rx;

        assert!(handle.steer(Direction::Up));
        assert!(handle.leave());
        assert!(handle.shutdown());

        assert!(matches!(
            rx.recv().await,
            Some(NodeMessage::Command(Command::Steer(Direction::Up)))
        ));
        assert!(matches!(
            rx.recv().await,
            Some(NodeMessage::Command(Command::Leave))
        ));
        assert!(matches!(rx.recv().await, Some(NodeMessage::Shutdown)));
    }

    #[tokio::test]
    async fn test_master_answers_direct_discover() {
        let mut node = hosted_node("alice").await;
        let addr = node.local_addr().unwrap();
        let handle = node.handle();
        let task = tokio::spawn(async move { node.run().await });

        let probe = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let data = encode(&GameMessage::new(Payload::Discover)).unwrap();
        probe.send_to(&data, addr).await.unwrap();

        let mut buffer = vec![0u8; MAX_DATAGRAM];
        let received =
            tokio::time::timeout(Duration::from_secs(2), probe.recv_from(&mut buffer)).await;
        let (len, from) = received.unwrap().unwrap();
        assert_eq!(from, addr);

        match decode(&buffer[..len]).unwrap().payload {
            Payload::Announcement { games } => {
                assert_eq!(games.len(), 1);
                assert_eq!(games[0].game_name, "snakes");
                assert_eq!(games[0].players[0].role, NodeRole::Master);
                assert!(games[0].can_join);
            }
            other => panic!("Expected Announcement, got {:?}", other),
        }

        assert!(handle.shutdown());
        let result = task.await.unwrap();
        assert_ok!(result);
    }

    #[tokio::test]
    async fn test_leave_ends_run_loop() {
        let mut node = hosted_node("alice").await;
        let mut events = node.subscribe();
        let handle = node.handle();
        let task = tokio::spawn(async move { node.run().await });

        assert!(handle.leave());
        let result = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert_ok!(result);

        let mut ended = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, NodeEvent::SessionEnded(_)) {
                ended = true;
            }
        }
        assert!(ended);
    }
}
