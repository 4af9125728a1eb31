//! Control requests addressed to the room.
//!
//! A frame with [`Target::Server`] is not relayed; its message type selects
//! one of the requests below and its payload carries little-endian ids.
//!
//! [`Target::Server`]: crate::Target::Server

use crate::{ClientId, ObjectId, Opcode, errors::ProtocolError};

/// A decoded control request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    /// Create an object owned by the sender.
    Instantiate {
        /// Object to create.
        object_id: ObjectId,
    },
    /// Destroy an object the sender owns.
    Destroy {
        /// Object to destroy.
        object_id: ObjectId,
    },
    /// Ask the owner of an object for control.
    RequestControlAuthority {
        /// Object whose owner is asked.
        object_id: ObjectId,
    },
    /// Give an owned object to another client.
    TransferControlAuthority {
        /// Object to hand over.
        object_id: ObjectId,
        /// New owner.
        target: ClientId,
    },
    /// Designate another client as host.
    MigrateHost {
        /// Client to promote.
        target: ClientId,
    },
}

impl ControlRequest {
    /// Decode a control request from its message type and payload.
    ///
    /// Bytes beyond the required ids are ignored.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::UnknownOpcode`] for lifecycle or unknown opcodes
    /// - [`ProtocolError::ShortPayload`] when an id is missing
    pub fn decode(message_type: u8, payload: &[u8]) -> Result<Self, ProtocolError> {
        let opcode =
            Opcode::from_u8(message_type).ok_or(ProtocolError::UnknownOpcode(message_type))?;

        match opcode {
            Opcode::Instantiate => {
                Ok(Self::Instantiate { object_id: read_u32(opcode, payload, 0)? })
            },
            Opcode::Destroy => Ok(Self::Destroy { object_id: read_u32(opcode, payload, 0)? }),
            Opcode::RequestControlAuthority => {
                Ok(Self::RequestControlAuthority { object_id: read_u32(opcode, payload, 0)? })
            },
            Opcode::TransferControlAuthority => Ok(Self::TransferControlAuthority {
                object_id: read_u32(opcode, payload, 0)?,
                target: read_u32(opcode, payload, 4)?,
            }),
            Opcode::MigrateHost => Ok(Self::MigrateHost { target: read_u32(opcode, payload, 0)? }),
            Opcode::NewConnection | Opcode::ExitConnection => {
                Err(ProtocolError::UnknownOpcode(message_type))
            },
        }
    }

    /// The opcode this request travels under.
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Instantiate { .. } => Opcode::Instantiate,
            Self::Destroy { .. } => Opcode::Destroy,
            Self::RequestControlAuthority { .. } => Opcode::RequestControlAuthority,
            Self::TransferControlAuthority { .. } => Opcode::TransferControlAuthority,
            Self::MigrateHost { .. } => Opcode::MigrateHost,
        }
    }

    /// Encode the request payload (without the frame header).
    pub fn encode_payload(&self) -> Vec<u8> {
        match *self {
            Self::Instantiate { object_id }
            | Self::Destroy { object_id }
            | Self::RequestControlAuthority { object_id } => object_id.to_le_bytes().to_vec(),
            Self::TransferControlAuthority { object_id, target } => {
                let mut payload = Vec::with_capacity(8);
                payload.extend_from_slice(&object_id.to_le_bytes());
                payload.extend_from_slice(&target.to_le_bytes());
                payload
            },
            Self::MigrateHost { target } => target.to_le_bytes().to_vec(),
        }
    }
}

fn read_u32(opcode: Opcode, payload: &[u8], offset: usize) -> Result<u32, ProtocolError> {
    let need = offset + 4;
    payload
        .get(offset..need)
        .and_then(|bytes| <[u8; 4]>::try_from(bytes).ok())
        .map(u32::from_le_bytes)
        .ok_or(ProtocolError::ShortPayload { opcode: opcode.name(), len: payload.len(), need })
}
