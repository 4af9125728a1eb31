//! Inbound and outbound frame codecs.
//!
//! # Invariants
//!
//! - Inbound frames are at least [`INBOUND_HEADER_SIZE`] bytes and at most the
//!   configured maximum; anything else is a [`ProtocolError`].
//! - Outbound frames always start with the sender's client id in
//!   little-endian order, followed by the message type.
//! - Decoding never copies the payload: it is a slice of the input buffer.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{ClientId, errors::ProtocolError};

/// Default maximum message size (matches the largest transport limit seen in
/// deployments).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 65_535;

/// `[target][message_type]`
pub const INBOUND_HEADER_SIZE: usize = 2;

/// `[sender u32 LE][message_type]`
pub const OUTBOUND_HEADER_SIZE: usize = 5;

/// Delivery target of an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Target {
    /// Every registered client, sender included.
    AllClients = 0,
    /// Every registered client except the sender.
    OtherClients = 1,
    /// Like `AllClients`, and retained for late joiners.
    AllClientsBuffered = 2,
    /// Like `OtherClients`, and retained for late joiners.
    OtherClientsBuffered = 3,
    /// Only the current host.
    Host = 4,
    /// The room itself (control channel).
    Server = 5,
}

impl Target {
    /// Parse a raw target byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::AllClients),
            1 => Some(Self::OtherClients),
            2 => Some(Self::AllClientsBuffered),
            3 => Some(Self::OtherClientsBuffered),
            4 => Some(Self::Host),
            5 => Some(Self::Server),
            _ => None,
        }
    }

    /// Raw byte value.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Whether frames to this target are retained for replay.
    pub fn is_buffered(self) -> bool {
        matches!(self, Self::AllClientsBuffered | Self::OtherClientsBuffered)
    }

    /// Whether fan-out to this target skips the sender.
    pub fn excludes_sender(self) -> bool {
        matches!(self, Self::OtherClients | Self::OtherClientsBuffered)
    }
}

/// A client-to-room frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    /// Where the frame should go.
    pub target: Target,
    /// Application-defined (or control) message type.
    pub message_type: u8,
    /// Opaque payload.
    pub payload: Bytes,
}

impl InboundFrame {
    /// Decode an inbound frame, enforcing the structural size bounds.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::TooShort`] for fewer than two bytes
    /// - [`ProtocolError::TooLarge`] above `max_message_size`
    /// - [`ProtocolError::UnknownTarget`] for a target byte outside the
    ///   enumeration
    pub fn decode(raw: Bytes, max_message_size: usize) -> Result<Self, ProtocolError> {
        if raw.len() < INBOUND_HEADER_SIZE {
            return Err(ProtocolError::TooShort { len: raw.len(), min: INBOUND_HEADER_SIZE });
        }
        if raw.len() > max_message_size {
            return Err(ProtocolError::TooLarge { len: raw.len(), max: max_message_size });
        }

        let target = Target::from_u8(raw[0]).ok_or(ProtocolError::UnknownTarget(raw[0]))?;
        let message_type = raw[1];
        let payload = raw.slice(INBOUND_HEADER_SIZE..);

        Ok(Self { target, message_type, payload })
    }

    /// Encode into wire bytes. Used by clients and tests.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(INBOUND_HEADER_SIZE + self.payload.len());
        buf.put_u8(self.target.to_u8());
        buf.put_u8(self.message_type);
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}

/// A room-to-client frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    /// Client the frame is attributed to.
    pub sender: ClientId,
    /// Message type, copied from the inbound frame or an [`Opcode`].
    ///
    /// [`Opcode`]: crate::Opcode
    pub message_type: u8,
    /// Opaque payload.
    pub payload: Bytes,
}

impl OutboundFrame {
    /// Length of the encoded frame for a payload of `payload_len` bytes.
    pub const fn encoded_len(payload_len: usize) -> usize {
        OUTBOUND_HEADER_SIZE + payload_len
    }

    /// Build the wire bytes for an outbound frame.
    pub fn encode(sender: ClientId, message_type: u8, payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::encoded_len(payload.len()));
        buf.put_u32_le(sender);
        buf.put_u8(message_type);
        buf.put_slice(payload);
        buf.freeze()
    }

    /// Decode an outbound frame. Used by clients and tests.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::TooShort`] if the header is incomplete.
    pub fn decode(raw: Bytes) -> Result<Self, ProtocolError> {
        if raw.len() < OUTBOUND_HEADER_SIZE {
            return Err(ProtocolError::TooShort { len: raw.len(), min: OUTBOUND_HEADER_SIZE });
        }

        let sender = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        let message_type = raw[4];
        let payload = raw.slice(OUTBOUND_HEADER_SIZE..);

        Ok(Self { sender, message_type, payload })
    }
}
