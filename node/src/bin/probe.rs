use clap::Parser;
use log::{info, warn};
use shared::{
    decode, encode, GameMessage, Payload, MAX_DATAGRAM, MULTICAST_GROUP, MULTICAST_PORT,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};

/// Sends one discovery probe and prints every announcement that comes back
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Where to send the probe; the announcement group by default
    #[arg(short, long)]
    target: Option<SocketAddr>,

    /// Seconds to wait for answers
    #[arg(short, long, default_value_t = 2)]
    wait_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    let target = args
        .target
        .unwrap_or_else(|| SocketAddr::from((MULTICAST_GROUP, MULTICAST_PORT)));

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.set_broadcast(true)?;
    println!("Probe socket bound to {}", socket.local_addr()?);

    let probe = encode(&GameMessage::new(Payload::Discover))?;
    socket.send_to(&probe, target).await?;
    println!("Sent Discover to {}", target);

    let mut buffer = vec![0u8; MAX_DATAGRAM];
    let deadline = Instant::now() + Duration::from_secs(args.wait_secs);
    let mut answers = 0;

    while let Ok(received) = timeout_at(deadline, socket.recv_from(&mut buffer)).await {
        let (len, from) = received?;
        match decode(&buffer[..len]) {
            Ok(message) => match message.payload {
                Payload::Announcement { games } => {
                    for game in games {
                        answers += 1;
                        println!(
                            "{} from {}: {}x{} board, {} ms ticks, {} players, joinable: {}",
                            game.game_name,
                            from,
                            game.config.width(),
                            game.config.height(),
                            game.config.state_delay_ms(),
                            game.players.len(),
                            game.can_join
                        );
                        for player in game.players {
                            println!(
                                "  #{} {} {} score {}",
                                player.id, player.name, player.role, player.score
                            );
                        }
                    }
                }
                other => info!("Ignoring {} from {}", other.kind(), from),
            },
            Err(e) => warn!("Undecodable reply from {}: {}", from, e),
        }
    }

    println!("{} session(s) found", answers);
    Ok(())
}
