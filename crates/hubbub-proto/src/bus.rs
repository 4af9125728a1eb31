//! Service-discovery bus payloads.
//!
//! Game servers announce themselves and their rooms on two pub/sub channels.
//! Each message is `[opcode: u8][CBOR body]`. Decoding turns the
//! `(channel, opcode)` pair into a closed [`BusMessage`] enum at the boundary,
//! so consumers never inspect raw bytes.
//!
//! The bus transport itself is not part of this crate.

use serde::{Deserialize, Serialize};

use crate::{RoomId, ServerId, errors::BusError};

/// Channel carrying server announcements.
pub const CHANNEL_SERVERS: &str = "channel_servers";

/// Channel carrying room announcements.
pub const CHANNEL_ROOMS: &str = "channel_rooms";

/// Opcode byte leading every bus message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BusOpcode {
    /// A game server came online or refreshed its entry.
    RegisterServer = 0,
    /// A game server went away.
    UnregisterServer = 1,
    /// A room was created or refreshed.
    RegisterRoom = 2,
    /// A room was closed.
    UnregisterRoom = 3,
}

impl BusOpcode {
    /// Parse a raw opcode byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::RegisterServer),
            1 => Some(Self::UnregisterServer),
            2 => Some(Self::RegisterRoom),
            3 => Some(Self::UnregisterRoom),
            _ => None,
        }
    }

    /// Channel this opcode is published on.
    pub fn channel(self) -> &'static str {
        match self {
            Self::RegisterServer | Self::UnregisterServer => CHANNEL_SERVERS,
            Self::RegisterRoom | Self::UnregisterRoom => CHANNEL_ROOMS,
        }
    }
}

/// A game server's public endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerAnnouncement {
    /// Cluster-assigned server id.
    pub server_id: ServerId,
    /// Host clients connect to.
    pub host: String,
    /// Port clients connect to.
    pub port: u16,
    /// Port of the server's room-creation API.
    pub api_port: u16,
}

/// A room hosted by some game server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomAnnouncement {
    /// Cluster-assigned room id.
    pub room_id: RoomId,
    /// Application the room belongs to.
    pub application_name: String,
    /// Application version.
    pub version: String,
    /// Whether joining requires a password.
    pub require_password: bool,
    /// Room capacity.
    pub max_users: u32,
    /// Currently connected clients.
    pub connected_users: u32,
    /// Server hosting the room.
    pub server: ServerAnnouncement,
}

/// A decoded bus message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusMessage {
    /// See [`BusOpcode::RegisterServer`].
    RegisterServer(ServerAnnouncement),
    /// See [`BusOpcode::UnregisterServer`].
    UnregisterServer(ServerAnnouncement),
    /// See [`BusOpcode::RegisterRoom`].
    RegisterRoom(RoomAnnouncement),
    /// See [`BusOpcode::UnregisterRoom`].
    UnregisterRoom(RoomAnnouncement),
}

impl BusMessage {
    /// Decode a message received on `channel`.
    ///
    /// # Errors
    ///
    /// - [`BusError::TooShort`] when there is no body after the opcode
    /// - [`BusError::UnknownChannel`] for channels other than the two above
    /// - [`BusError::InvalidOpcode`] for unknown opcodes or opcodes that
    ///   belong to the other channel
    /// - [`BusError::Body`] when the CBOR body does not match the opcode
    pub fn decode(channel: &str, data: &[u8]) -> Result<Self, BusError> {
        if data.len() <= 1 {
            return Err(BusError::TooShort(data.len()));
        }
        if channel != CHANNEL_SERVERS && channel != CHANNEL_ROOMS {
            return Err(BusError::UnknownChannel(channel.to_string()));
        }

        let opcode = BusOpcode::from_u8(data[0])
            .filter(|op| op.channel() == channel)
            .ok_or_else(|| BusError::InvalidOpcode {
                channel: channel.to_string(),
                opcode: data[0],
            })?;
        let body = &data[1..];

        match opcode {
            BusOpcode::RegisterServer => Ok(Self::RegisterServer(decode_body(body)?)),
            BusOpcode::UnregisterServer => Ok(Self::UnregisterServer(decode_body(body)?)),
            BusOpcode::RegisterRoom => Ok(Self::RegisterRoom(decode_body(body)?)),
            BusOpcode::UnregisterRoom => Ok(Self::UnregisterRoom(decode_body(body)?)),
        }
    }

    /// Opcode of this message.
    pub fn opcode(&self) -> BusOpcode {
        match self {
            Self::RegisterServer(_) => BusOpcode::RegisterServer,
            Self::UnregisterServer(_) => BusOpcode::UnregisterServer,
            Self::RegisterRoom(_) => BusOpcode::RegisterRoom,
            Self::UnregisterRoom(_) => BusOpcode::UnregisterRoom,
        }
    }

    /// Channel to publish this message on.
    pub fn channel(&self) -> &'static str {
        self.opcode().channel()
    }

    /// Encode as `[opcode][CBOR body]`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Body`] if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, BusError> {
        let mut out = vec![self.opcode() as u8];
        let result = match self {
            Self::RegisterServer(server) | Self::UnregisterServer(server) => {
                ciborium::ser::into_writer(server, &mut out)
            },
            Self::RegisterRoom(room) | Self::UnregisterRoom(room) => {
                ciborium::ser::into_writer(room, &mut out)
            },
        };
        result.map_err(|e| BusError::Body(e.to_string()))?;
        Ok(out)
    }
}

fn decode_body<T: for<'de> Deserialize<'de>>(body: &[u8]) -> Result<T, BusError> {
    ciborium::de::from_reader(body).map_err(|e| BusError::Body(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> ServerAnnouncement {
        ServerAnnouncement {
            server_id: 7,
            host: "10.0.0.7".to_string(),
            port: 4000,
            api_port: 4001,
        }
    }

    fn room() -> RoomAnnouncement {
        RoomAnnouncement {
            room_id: 99,
            application_name: "kart".to_string(),
            version: "1.2".to_string(),
            require_password: false,
            max_users: 8,
            connected_users: 3,
            server: server(),
        }
    }

    #[test]
    fn decode_register_room() {
        let msg = BusMessage::RegisterRoom(room());
        let bytes = msg.encode().expect("encode");

        let decoded = BusMessage::decode(CHANNEL_ROOMS, &bytes).expect("decode");
        assert_eq!(decoded, msg);
    }

    #[test]
    fn decode_rejects_opcode_on_wrong_channel() {
        let bytes = BusMessage::RegisterServer(server()).encode().expect("encode");

        let err = BusMessage::decode(CHANNEL_ROOMS, &bytes).unwrap_err();
        assert!(matches!(err, BusError::InvalidOpcode { opcode: 0, .. }));
    }

    #[test]
    fn decode_rejects_unknown_channel() {
        let bytes = BusMessage::RegisterServer(server()).encode().expect("encode");

        let err = BusMessage::decode("channel_lobby", &bytes).unwrap_err();
        assert!(matches!(err, BusError::UnknownChannel(_)));
    }

    #[test]
    fn decode_rejects_empty_and_bare_opcode() {
        assert!(matches!(BusMessage::decode(CHANNEL_ROOMS, &[]), Err(BusError::TooShort(0))));
        assert!(matches!(BusMessage::decode(CHANNEL_ROOMS, &[2]), Err(BusError::TooShort(1))));
    }

    #[test]
    fn decode_rejects_garbage_body() {
        let err = BusMessage::decode(CHANNEL_SERVERS, &[0, 0xFF, 0xFF]).unwrap_err();
        assert!(matches!(err, BusError::Body(_)));
    }
}
