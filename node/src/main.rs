use clap::{Parser, Subcommand};
use log::{info, warn};
use node::{Controller, Node, NodeEvent, NodeHandle, NodeSettings};
use shared::{Direction, GameConfig, NodeRole};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Local address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Local port (0 picks a free one)
    #[arg(short, long, default_value = "0")]
    port: u16,

    /// Player name shown to others
    #[arg(short, long, default_value = "player")]
    name: String,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Start a new session as master
    Host {
        /// Session name
        #[arg(short, long, default_value = "snakes")]
        game: String,

        #[arg(long, default_value_t = 40)]
        width: i32,

        /// Board height (no short flag to avoid conflict with --help)
        #[arg(long, default_value_t = 30)]
        height: i32,

        /// Food kept on the board besides one per snake
        #[arg(long, default_value_t = 1)]
        food: i32,

        /// Tick period in milliseconds
        #[arg(long, default_value_t = 1000)]
        delay: u32,
    },
    /// Join a running session
    Join {
        /// Session to join; the first one found if omitted
        game: Option<String>,

        /// Probe this master directly instead of listening for announcements
        #[arg(long)]
        master: Option<SocketAddr>,

        /// Watch without a snake
        #[arg(long)]
        viewer: bool,

        /// Seconds to wait for announcements
        #[arg(long, default_value_t = 3)]
        wait_secs: u64,
    },
    /// List sessions announced on the local network
    List {
        #[arg(long, default_value_t = 3)]
        wait_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let bind: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;

    match args.mode {
        Mode::Host {
            game,
            width,
            height,
            food,
            delay,
        } => {
            let config = GameConfig::new(width, height, food, delay);
            let mut controller = Controller::new(&args.name);
            controller.host(&game, config, Instant::now())?;

            let settings = NodeSettings {
                bind,
                discovery: true,
                ..NodeSettings::default()
            };
            let node = Node::bind(settings, controller).await?;
            info!("Hosting '{}' at {}", game, node.local_addr()?);
            play(node).await?;
        }

        Mode::Join {
            game,
            master,
            viewer,
            wait_secs,
        } => {
            let settings = NodeSettings {
                bind,
                discovery: master.is_none(),
                ..NodeSettings::default()
            };
            let mut node = Node::bind(settings, Controller::new(&args.name)).await?;
            let games = node
                .discover(Duration::from_secs(wait_secs), master)
                .await;

            let chosen = games
                .into_iter()
                .find(|info| game.as_deref().map_or(true, |name| info.name == name))
                .ok_or_else(|| format!("no session {} found", game.as_deref().unwrap_or("")))?;

            let role = if viewer {
                NodeRole::Viewer
            } else {
                NodeRole::Normal
            };
            node.controller_mut().join(
                chosen.master_addr,
                &chosen.name,
                chosen.config,
                role,
                Instant::now(),
            )?;
            play(node).await?;
        }

        Mode::List { wait_secs } => {
            let settings = NodeSettings {
                bind,
                discovery: true,
                ..NodeSettings::default()
            };
            let mut node = Node::bind(settings, Controller::new(&args.name)).await?;
            let games = node.discover(Duration::from_secs(wait_secs), None).await;

            if games.is_empty() {
                println!("No sessions found");
            }
            for info in games {
                println!(
                    "{} at {}: {}x{}, {} players{}",
                    info.name,
                    info.master_addr,
                    info.config.width(),
                    info.config.height(),
                    info.player_count,
                    if info.can_join { "" } else { " (full)" }
                );
            }
        }
    }

    Ok(())
}

/// Runs a session with keyboard input and event logging attached.
async fn play(mut node: Node) -> Result<(), Box<dyn std::error::Error>> {
    let handle = node.handle();
    let events = node.subscribe();

    info!("Controls: w/a/s/d + Enter to steer, q to leave");
    tokio::spawn(read_commands(handle.clone()));
    tokio::spawn(log_events(events));
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, leaving session...");
            handle.leave();
        }
    });

    node.run().await?;
    Ok(())
}

async fn read_commands(handle: NodeHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let sent = match line.trim() {
            "w" => handle.steer(Direction::Up),
            "a" => handle.steer(Direction::Left),
            "s" => handle.steer(Direction::Down),
            "d" => handle.steer(Direction::Right),
            "q" => handle.leave(),
            "" => true,
            other => {
                warn!("Unknown command '{}'", other);
                true
            }
        };
        if !sent {
            break;
        }
    }
}

async fn log_events(mut events: tokio::sync::mpsc::UnboundedReceiver<NodeEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            NodeEvent::Joined { player_id } => info!("Joined as player {}", player_id),
            NodeEvent::StateUpdated(state) => {
                let scores: Vec<String> = state
                    .players
                    .iter()
                    .map(|p| format!("{}:{}({})", p.name, p.score, p.role))
                    .collect();
                info!(
                    "State {}: {} snakes, {} food | {}",
                    state.state_order,
                    state.snakes.len(),
                    state.foods.len(),
                    scores.join(" ")
                );
            }
            NodeEvent::RoleChanged { from, to } => match from {
                Some(from) => info!("Now {} (was {})", to, from),
                None => info!("Now {}", to),
            },
            NodeEvent::Error(message) => warn!("Peer error: {}", message),
            NodeEvent::GamesUpdated(games) => info!("{} sessions known", games.len()),
            NodeEvent::SessionEnded(reason) => info!("Session ended: {}", reason),
        }
    }
}
