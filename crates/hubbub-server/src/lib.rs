//! Hubbub production server.
//!
//! Runs the relay engine from `hubbub-core` over WebSocket:
//! - Tokio for the async runtime
//! - tokio-tungstenite for the WebSocket transport
//! - System time for room idle timers
//!
//! ## Architecture
//!
//! ```text
//! hubbub-server
//!   ├─ Server        (accept loop, upgrade at /rooms/{id})
//!   ├─ RoomRegistry  (room id -> running room actor)
//!   ├─ room_task     (one actor per room owning a core Room)
//!   ├─ pump          (per-connection read/write loops)
//!   └─ SystemEnv     (production Environment impl)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
pub mod pump;
mod registry;
pub mod room_task;
mod system_env;

use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

pub use error::ServerError;
use hubbub_core::RoomConfig;
use hubbub_proto::RoomId;
pub use pump::{Disconnect, Outbox, OutboxReceiver, PumpConfig};
pub use registry::RoomRegistry;
pub use room_task::{RoomEvent, RoomHandle, RoomSnapshot, RoomTaskConfig, spawn_room};
pub use system_env::SystemEnv;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::{
    handshake::server::{ErrorResponse, Request, Response},
    http::StatusCode,
    protocol::WebSocketConfig,
};

/// Path prefix rooms are served under.
pub const ROOM_PATH_PREFIX: &str = "/rooms/";

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:4000")
    pub bind_address: String,
    /// Rooms to start at boot.
    pub rooms: Vec<RoomId>,
    /// Start a room on first connection instead of refusing the upgrade.
    pub auto_create_rooms: bool,
    /// Room engine limits.
    pub room: RoomConfig,
    /// Connection pump limits and timers.
    pub pump: PumpConfig,
    /// Close a room once it has been empty this long.
    pub room_idle_timeout: Option<Duration>,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:4000".to_string(),
            rooms: Vec::new(),
            auto_create_rooms: false,
            room: RoomConfig::default(),
            pump: PumpConfig::default(),
            room_idle_timeout: Some(Duration::from_secs(300)),
        }
    }
}

impl ServerRuntimeConfig {
    /// Check the timer and size settings for consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.pump.pong_wait <= self.pump.ping_period {
            return Err(ServerError::Config(format!(
                "pong wait ({:?}) must exceed ping period ({:?})",
                self.pump.pong_wait, self.pump.ping_period
            )));
        }
        if self.pump.outbound_capacity == 0 {
            return Err(ServerError::Config("outbound capacity must be positive".to_string()));
        }
        if self.room.max_message_size < hubbub_proto::OUTBOUND_HEADER_SIZE {
            return Err(ServerError::Config(format!(
                "max message size must be at least {}",
                hubbub_proto::OUTBOUND_HEADER_SIZE
            )));
        }
        Ok(())
    }
}

/// Production hubbub server.
pub struct Server {
    listener: TcpListener,
    registry: Arc<RoomRegistry<SystemEnv>>,
    config: ServerRuntimeConfig,
}

impl Server {
    /// Bind the listener and start the configured rooms.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The configuration is inconsistent
    /// - Binding to the address fails
    /// - The same room id is listed twice
    pub async fn bind(config: ServerRuntimeConfig) -> Result<Self, ServerError> {
        config.validate()?;

        let listener = TcpListener::bind(&config.bind_address).await?;
        let room_config = RoomTaskConfig {
            room: config.room.clone(),
            idle_timeout: config.room_idle_timeout,
            ..RoomTaskConfig::default()
        };
        let registry = Arc::new(RoomRegistry::new(room_config, SystemEnv::new()));

        for room_id in &config.rooms {
            registry.create_room(*room_id)?;
        }

        Ok(Self { listener, registry, config })
    }

    /// Get the local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Rooms served by this server.
    pub fn registry(&self) -> Arc<RoomRegistry<SystemEnv>> {
        Arc::clone(&self.registry)
    }

    /// Run until the server is shut down by a fatal error.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    /// Accept connections until `shutdown` resolves, then close every room.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        tracing::info!("Server listening on {}", self.local_addr()?);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let registry = Arc::clone(&self.registry);
                        let config = self.config.clone();

                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, registry, &config).await {
                                tracing::debug!("Connection from {} ended: {}", peer, e);
                            }
                        });
                    },
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                    },
                },
            }
        }

        tracing::info!("Server shutting down");
        self.registry.close_all().await;
        Ok(())
    }
}

/// Parse `/rooms/{id}`.
pub fn parse_room_path(path: &str) -> Option<RoomId> {
    path.strip_prefix(ROOM_PATH_PREFIX)?.parse().ok()
}

/// Upgrade one TCP connection and pump it against its room.
async fn handle_connection(
    stream: TcpStream,
    registry: Arc<RoomRegistry<SystemEnv>>,
    config: &ServerRuntimeConfig,
) -> Result<(), ServerError> {
    let mut room = None;
    let resolve = |request: &Request, response: Response| {
        let handle = parse_room_path(request.uri().path()).and_then(|room_id| {
            if config.auto_create_rooms {
                Some(registry.get_or_create(room_id))
            } else {
                registry.get(room_id)
            }
        });

        match handle {
            Some(handle) => {
                room = Some(handle);
                Ok(response)
            },
            None => {
                let mut refusal = ErrorResponse::new(Some("unknown room".to_string()));
                *refusal.status_mut() = StatusCode::NOT_FOUND;
                Err(refusal)
            },
        }
    };

    // Headroom above the relay limit so oversized messages reach the pump and
    // are dropped there instead of failing the connection.
    let transport_limit = config.pump.max_message_size.saturating_mul(2);
    let ws_config = WebSocketConfig::default()
        .max_message_size(Some(transport_limit))
        .max_frame_size(Some(transport_limit));

    let ws = tokio_tungstenite::accept_hdr_async_with_config(stream, resolve, Some(ws_config))
        .await
        .map_err(|e| ServerError::Handshake(e.to_string()))?;
    let room = room.ok_or_else(|| ServerError::Handshake("room not resolved".to_string()))?;

    pump::serve(ws, room, &config.pump).await?;
    Ok(())
}
