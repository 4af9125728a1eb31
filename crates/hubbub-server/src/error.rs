//! Server error types.

use std::fmt;

use hubbub_core::RoomError;
use hubbub_proto::RoomId;

/// Errors that can occur in the server.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error
    Config(String),

    /// Transport/network error
    Transport(String),

    /// WebSocket upgrade failed or was refused
    Handshake(String),

    /// Room refused the client
    Room(RoomError),

    /// A room with this id is already running
    RoomExists(RoomId),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Handshake(msg) => write!(f, "handshake error: {msg}"),
            Self::Room(err) => write!(f, "room error: {err}"),
            Self::RoomExists(id) => write!(f, "room {id} already exists"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Room(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RoomError> for ServerError {
    fn from(err: RoomError) -> Self {
        Self::Room(err)
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
