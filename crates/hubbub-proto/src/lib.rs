//! Hubbub wire protocol.
//!
//! Binary formats spoken between game clients and a room, plus the payloads
//! exchanged on the service-discovery bus. This crate performs no I/O: every
//! type here is plain data with a `decode`/`encode` pair.
//!
//! # Frame layout
//!
//! ```text
//! client -> room   [target: u8][message_type: u8][payload ...]
//! room -> client   [sender: u32 LE][message_type: u8][payload ...]
//! ```
//!
//! Frames addressed to [`Target::Server`] carry a [`ControlRequest`] instead
//! of application data. Every other target is relayed verbatim.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bus;
pub mod control;
pub mod errors;
pub mod frame;
pub mod opcode;

pub use bus::{BusMessage, BusOpcode, RoomAnnouncement, ServerAnnouncement};
pub use control::ControlRequest;
pub use errors::{BusError, ProtocolError};
pub use frame::{
    DEFAULT_MAX_MESSAGE_SIZE, INBOUND_HEADER_SIZE, InboundFrame, OUTBOUND_HEADER_SIZE,
    OutboundFrame, Target,
};
pub use opcode::Opcode;

/// Client identifier, unique within a room while the client is connected.
pub type ClientId = u32;

/// Application-chosen game object identifier.
pub type ObjectId = u32;

/// Room identifier, issued by the cluster-level allocator.
pub type RoomId = u32;

/// Game server identifier, issued by the cluster-level allocator.
pub type ServerId = u32;
