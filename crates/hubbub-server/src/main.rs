//! Hubbub relay server binary.
//!
//! # Usage
//!
//! ```bash
//! # Serve rooms 1 and 2
//! hubbub-server --bind 0.0.0.0:4000 --room 1 --room 2
//!
//! # Start rooms on demand
//! hubbub-server --auto-create-rooms
//! ```

use std::time::Duration;

use clap::Parser;
use hubbub_core::{DEFAULT_MAX_CLIENTS, RoomConfig};
use hubbub_proto::{DEFAULT_MAX_MESSAGE_SIZE, RoomId};
use hubbub_server::{PumpConfig, Server, ServerRuntimeConfig};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Hubbub room relay server
#[derive(Parser, Debug)]
#[command(name = "hubbub-server")]
#[command(about = "Room relay server for multiplayer sessions")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:4000")]
    bind: String,

    /// Room to start at boot (repeatable)
    #[arg(short, long = "room")]
    rooms: Vec<RoomId>,

    /// Start rooms on first connection
    #[arg(long)]
    auto_create_rooms: bool,

    /// Maximum clients per room
    #[arg(long, default_value_t = DEFAULT_MAX_CLIENTS)]
    max_clients: u32,

    /// Maximum message size in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_MESSAGE_SIZE)]
    max_message_size: usize,

    /// Outbound queue capacity per connection, in frames
    #[arg(long, default_value = "256")]
    outbound_capacity: usize,

    /// Seconds of quiet before a keepalive ping
    #[arg(long, default_value = "54")]
    ping_period_secs: u64,

    /// Read deadline in seconds
    #[arg(long, default_value = "60")]
    pong_wait_secs: u64,

    /// Write deadline in seconds
    #[arg(long, default_value = "10")]
    write_wait_secs: u64,

    /// Close rooms left empty this many seconds (0 = never)
    #[arg(long, default_value = "300")]
    room_idle_secs: u64,

    /// Replay join notices to later joiners
    #[arg(long)]
    replay_join_notices: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("Hubbub server starting");
    tracing::info!("Binding to {}", args.bind);

    if args.rooms.is_empty() && !args.auto_create_rooms {
        tracing::warn!("No rooms configured and auto-create is off");
        tracing::warn!("Every upgrade will be refused!");
    }

    let config = ServerRuntimeConfig {
        bind_address: args.bind,
        rooms: args.rooms,
        auto_create_rooms: args.auto_create_rooms,
        room: RoomConfig {
            max_message_size: args.max_message_size,
            max_clients: args.max_clients,
            replay_join_notices: args.replay_join_notices,
        },
        pump: PumpConfig {
            outbound_capacity: args.outbound_capacity,
            ping_period: Duration::from_secs(args.ping_period_secs),
            pong_wait: Duration::from_secs(args.pong_wait_secs),
            write_wait: Duration::from_secs(args.write_wait_secs),
            max_message_size: args.max_message_size,
        },
        room_idle_timeout: (args.room_idle_secs > 0)
            .then(|| Duration::from_secs(args.room_idle_secs)),
    };

    let server = Server::bind(config).await?;

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    Ok(())
}
