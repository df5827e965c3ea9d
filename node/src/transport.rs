//! UDP sockets and datagram helpers

use crate::error::Result;
use log::info;
use shared::{decode, encode, GameMessage, MULTICAST_GROUP, MULTICAST_PORT};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use tokio::net::UdpSocket;

/// Where and how a node talks to the network.
#[derive(Debug, Clone)]
pub struct NodeSettings {
    /// Address of the unicast socket used for all game traffic
    pub bind: SocketAddr,
    pub multicast_group: Ipv4Addr,
    pub multicast_port: u16,
    /// Listen on the multicast group for announcements and probes
    pub discovery: bool,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            multicast_group: MULTICAST_GROUP,
            multicast_port: MULTICAST_PORT,
            discovery: false,
        }
    }
}

impl NodeSettings {
    pub fn multicast_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.multicast_group, self.multicast_port))
    }

    pub fn broadcast_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, self.multicast_port))
    }
}

/// Binds the socket used for game traffic.
pub async fn bind_unicast(addr: SocketAddr) -> Result<UdpSocket> {
    let socket = UdpSocket::bind(addr).await?;
    socket.set_broadcast(true)?;
    info!("Listening on {}", socket.local_addr()?);
    Ok(socket)
}

/// Binds the discovery port and joins the announcement group.
pub async fn bind_multicast(group: Ipv4Addr, port: u16) -> Result<UdpSocket> {
    let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))).await?;
    socket.join_multicast_v4(group, Ipv4Addr::UNSPECIFIED)?;
    info!("Joined multicast group {}:{}", group, port);
    Ok(socket)
}

pub async fn send_message(
    socket: &UdpSocket,
    message: &GameMessage,
    addr: SocketAddr,
) -> Result<()> {
    let data = encode(message)?;
    socket.send_to(&data, addr).await?;
    Ok(())
}

pub fn decode_datagram(bytes: &[u8]) -> Result<GameMessage> {
    Ok(decode(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Payload;

    #[test]
    fn test_default_settings() {
        let settings = NodeSettings::default();
        assert_eq!(
            settings.multicast_addr(),
            "239.192.0.4:9192".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            settings.broadcast_addr(),
            "255.255.255.255:9192".parse::<SocketAddr>().unwrap()
        );
        assert!(!settings.discovery);
    }

    #[test]
    fn test_garbage_datagram_is_an_error() {
        assert!(decode_datagram(&[0xFF; 3]).is_err());
    }

    #[tokio::test]
    async fn test_loopback_exchange() {
        let a = bind_unicast("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let b = bind_unicast("127.0.0.1:0".parse().unwrap()).await.unwrap();

        let mut ping = GameMessage::new(Payload::Ping).from_player(Some(3));
        ping.msg_seq = 8;
        send_message(&a, &ping, b.local_addr().unwrap())
            .await
            .unwrap();

        let mut buffer = [0u8; 1024];
        let (len, from) = b.recv_from(&mut buffer).await.unwrap();
        assert_eq!(from, a.local_addr().unwrap());
        assert_eq!(decode_datagram(&buffer[..len]).unwrap(), ping);
    }
}
