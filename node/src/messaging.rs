//! Reliable delivery on top of plain datagrams
//!
//! Every outgoing message gets a sequence number from a per-node counter.
//! Messages that need an acknowledgment are kept in a ledger and resent
//! until acknowledged or abandoned. Nothing here touches a socket: sends are
//! queued as [`Outgoing`] entries that the node task drains and transmits.

use log::{debug, warn};
use shared::GameMessage;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A datagram waiting to be put on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    Unicast {
        addr: SocketAddr,
        message: GameMessage,
    },
    /// To the discovery multicast group
    Multicast { message: GameMessage },
    /// To the local broadcast address on the discovery port
    Broadcast { message: GameMessage },
}

/// Ledger entry for a sent, not yet acknowledged message.
#[derive(Debug, Clone)]
pub struct PendingMessage {
    pub message: GameMessage,
    pub addr: SocketAddr,
    pub created: Instant,
    pub last_sent: Instant,
}

#[derive(Debug, Default)]
pub struct Messenger {
    next_seq: u64,
    pending: BTreeMap<u64, PendingMessage>,
    outbox: Vec<Outgoing>,
}

impl Messenger {
    pub fn new() -> Self {
        Self::default()
    }

    fn assign_seq(&mut self, message: &mut GameMessage) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        message.msg_seq = seq;
        seq
    }

    /// Sends `message` to `addr` under a fresh sequence number
    ///
    /// Anything but acks, probes and announcements is also recorded in the
    /// ledger for retransmission.
    pub fn send(&mut self, addr: SocketAddr, mut message: GameMessage, now: Instant) -> u64 {
        let seq = self.assign_seq(&mut message);
        if message.payload.needs_ack() {
            self.pending.insert(
                seq,
                PendingMessage {
                    message: message.clone(),
                    addr,
                    created: now,
                    last_sent: now,
                },
            );
        }
        debug!("-> {} {} seq={}", addr, message.payload.kind(), seq);
        self.outbox.push(Outgoing::Unicast { addr, message });
        seq
    }

    /// Sends a reply that echoes the sequence number of the message it answers.
    pub fn reply(&mut self, addr: SocketAddr, message: GameMessage) {
        debug!(
            "-> {} {} (reply to seq={})",
            addr,
            message.payload.kind(),
            message.msg_seq
        );
        self.outbox.push(Outgoing::Unicast { addr, message });
    }

    pub fn multicast(&mut self, mut message: GameMessage) {
        self.assign_seq(&mut message);
        self.outbox.push(Outgoing::Multicast { message });
    }

    pub fn broadcast(&mut self, mut message: GameMessage) {
        self.assign_seq(&mut message);
        self.outbox.push(Outgoing::Broadcast { message });
    }

    /// Clears the ledger entry for `seq`. Returns whether one was pending.
    pub fn on_ack(&mut self, seq: u64) -> bool {
        self.pending.remove(&seq).is_some()
    }

    /// Retransmits overdue entries and drops abandoned ones
    ///
    /// Entries older than `abandon_after` are removed without another send;
    /// entries not sent for `retry` are resent with their original sequence.
    pub fn reconcile(&mut self, now: Instant, retry: Duration, abandon_after: Duration) {
        let outbox = &mut self.outbox;
        self.pending.retain(|seq, entry| {
            if now.saturating_duration_since(entry.created) > abandon_after {
                warn!(
                    "Abandoning {} seq={} to {} after {:?}",
                    entry.message.payload.kind(),
                    seq,
                    entry.addr,
                    abandon_after
                );
                return false;
            }
            if now.saturating_duration_since(entry.last_sent) >= retry {
                entry.last_sent = now;
                outbox.push(Outgoing::Unicast {
                    addr: entry.addr,
                    message: entry.message.clone(),
                });
            }
            true
        });
    }

    /// Points every pending entry addressed to `from` at `to` instead.
    pub fn redirect(&mut self, from: SocketAddr, to: SocketAddr) {
        for entry in self.pending.values_mut().filter(|e| e.addr == from) {
            entry.addr = to;
        }
    }

    /// Forgets every pending entry.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn drain(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.outbox)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, seq: u64) -> bool {
        self.pending.contains_key(&seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{Direction, GameAnnouncement, GameConfig, Payload};

    fn peer() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    fn steer() -> GameMessage {
        GameMessage::new(Payload::Steer {
            direction: Direction::Up,
        })
    }

    #[test]
    fn test_sequence_numbers_increase() {
        let mut messenger = Messenger::new();
        let now = Instant::now();

        let first = messenger.send(peer(), steer(), now);
        let second = messenger.send(peer(), GameMessage::new(Payload::Ping), now);
        messenger.broadcast(GameMessage::new(Payload::Discover));
        let third = messenger.send(peer(), steer(), now);

        assert!(first < second);
        assert_eq!(third, second + 2);
        assert_eq!(messenger.drain().len(), 4);
        assert!(messenger.drain().is_empty());
    }

    #[test]
    fn test_only_reliable_payloads_enter_ledger() {
        let mut messenger = Messenger::new();
        let now = Instant::now();

        messenger.send(peer(), GameMessage::new(Payload::Discover), now);
        messenger.send(
            peer(),
            GameMessage::new(Payload::Announcement {
                games: vec![GameAnnouncement {
                    game_name: "snakes".into(),
                    players: vec![],
                    config: GameConfig::default(),
                    can_join: true,
                }],
            }),
            now,
        );
        messenger.reply(peer(), GameMessage::ack(3, None, None));
        assert_eq!(messenger.pending_len(), 0);

        let seq = messenger.send(peer(), steer(), now);
        assert!(messenger.is_pending(seq));
        assert!(messenger.on_ack(seq));
        assert!(!messenger.on_ack(seq));
    }

    #[test]
    fn test_reconcile_resends_without_new_sequence() {
        let mut messenger = Messenger::new();
        let sent_at = Instant::now() - Duration::from_millis(150);
        let seq = messenger.send(peer(), steer(), sent_at);
        messenger.drain();

        messenger.reconcile(
            Instant::now(),
            Duration::from_millis(100),
            Duration::from_secs(5),
        );

        let resent = messenger.drain();
        assert_eq!(resent.len(), 1);
        match &resent[0] {
            Outgoing::Unicast { addr, message } => {
                assert_eq!(*addr, peer());
                assert_eq!(message.msg_seq, seq);
            }
            other => panic!("unexpected outgoing {:?}", other),
        }
        assert!(messenger.is_pending(seq));
    }

    #[test]
    fn test_reconcile_skips_recent_entries() {
        let mut messenger = Messenger::new();
        let now = Instant::now();
        messenger.send(peer(), steer(), now);
        messenger.drain();

        messenger.reconcile(now, Duration::from_millis(100), Duration::from_secs(5));
        assert!(messenger.drain().is_empty());
    }

    #[test]
    fn test_abandoned_entries_are_purged_without_resend() {
        let mut messenger = Messenger::new();
        let created = Instant::now() - Duration::from_millis(5_100);
        let seq = messenger.send(peer(), steer(), created);
        messenger.drain();

        messenger.reconcile(
            Instant::now(),
            Duration::from_millis(100),
            Duration::from_millis(5_000),
        );

        assert!(!messenger.is_pending(seq));
        assert!(messenger.drain().is_empty());
    }

    #[test]
    fn test_redirect_retargets_pending_entries() {
        let mut messenger = Messenger::new();
        let deputy: SocketAddr = "127.0.0.1:9001".parse().unwrap();
        let sent_at = Instant::now() - Duration::from_millis(200);
        messenger.send(peer(), steer(), sent_at);
        messenger.drain();

        messenger.redirect(peer(), deputy);
        messenger.reconcile(
            Instant::now(),
            Duration::from_millis(100),
            Duration::from_secs(5),
        );

        let resent = messenger.drain();
        assert!(matches!(&resent[0], Outgoing::Unicast { addr, .. } if *addr == deputy));
    }
}
