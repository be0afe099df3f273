use clap::Parser;
use client::game::ClientGameState;
use client::network::{ClientError, HeartbeatStream, SessionClient};
use log::{error, info, warn};
use rand::Rng;
use shared::{Facing, WireFormat};
use std::net::{IpAddr, SocketAddr};
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Headless bot that joins a session and wanders while allowed to move
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address
    #[arg(short = 's', long, env = "SERVER", default_value = "127.0.0.1")]
    server: IpAddr,

    /// Session (UDP) port of the server
    #[arg(long, env = "UDP_PORT", default_value_t = 8081)]
    udp_port: u16,

    /// Heartbeat (TCP) port of the server
    #[arg(long, env = "TCP_PORT", default_value_t = 8080)]
    tcp_port: u16,

    /// Display name; the slot colour is used when omitted
    #[arg(short = 'n', long)]
    name: Option<String>,

    /// Number of ticks before disconnecting
    #[arg(short = 't', long, default_value_t = 600)]
    ticks: u64,

    /// Milliseconds per tick
    #[arg(long, default_value_t = 50)]
    tick_ms: u64,

    /// Encoding on both sockets: json or bincode
    #[arg(long, env = "WIRE_FORMAT", default_value = "json")]
    wire_format: WireFormat,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    let heartbeat =
        HeartbeatStream::connect(SocketAddr::new(args.server, args.tcp_port), args.wire_format)
            .await?;
    let mut heartbeat = tokio::spawn(heartbeat.run());

    let session =
        SessionClient::connect(SocketAddr::new(args.server, args.udp_port), args.wire_format)
            .await?;
    let mut state = ClientGameState::new();
    state.apply(&session.welcome());
    if let Some(name) = &args.name {
        state.rename(name.as_str());
    }
    session.send_ready(Some(state.local().clone())).await?;

    let mut ticker = interval(Duration::from_millis(args.tick_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut rng = rand::thread_rng();
    let mut facing = Facing::Right;
    let mut ticks = 0;

    while ticks < args.ticks {
        tokio::select! {
            _ = ticker.tick() => {
                ticks += 1;
                // Turn around now and then.
                if rng.gen_bool(0.1) {
                    facing = match facing {
                        Facing::Left => Facing::Right,
                        Facing::Right => Facing::Left,
                    };
                }
                if state.step(facing) {
                    session.send_local_data(state.local().clone()).await?;
                }
            }
            received = session.recv() => match received {
                Ok(message) => {
                    if state.apply(&message) {
                        info!(
                            "Update {:?}: {} other player(s), can move: {}",
                            state.last_update(),
                            state.remote().len(),
                            state.can_move()
                        );
                    }
                }
                Err(ClientError::Transport(e)) if e.is_decode() => warn!("Dropped datagram: {}", e),
                Err(e) => error!("Session error: {}", e),
            },
            _ = &mut heartbeat => {
                warn!("Heartbeat stream ended, leaving");
                return Err(ClientError::NotConnected.into());
            }
        }
    }

    session.disconnect().await?;
    heartbeat.abort();
    Ok(())
}
