//! Protocol error types.

use thiserror::Error;

/// Errors produced while decoding client frames.
///
/// All of these are non-fatal: the offending message is dropped and the
/// connection stays open.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Frame is shorter than the fixed header.
    #[error("frame too short: {len} bytes (need at least {min})")]
    TooShort {
        /// Actual frame length.
        len: usize,
        /// Minimum length for this frame kind.
        min: usize,
    },

    /// Frame exceeds the configured maximum message size.
    #[error("frame too large: {len} bytes (max {max})")]
    TooLarge {
        /// Actual (or reconstructed) frame length.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Target byte is not part of the target enumeration.
    #[error("unknown target: {0}")]
    UnknownTarget(u8),

    /// Message type is not a control opcode the room understands.
    #[error("unknown opcode: {0}")]
    UnknownOpcode(u8),

    /// Control payload is missing one of its identifiers.
    #[error("short payload for {opcode}: {len} bytes (need {need})")]
    ShortPayload {
        /// Opcode name.
        opcode: &'static str,
        /// Actual payload length.
        len: usize,
        /// Required payload length.
        need: usize,
    },
}

/// Errors produced while decoding discovery-bus messages.
#[derive(Debug, Error)]
pub enum BusError {
    /// Message has no body after the opcode byte.
    #[error("bus message too short: {0} bytes")]
    TooShort(usize),

    /// Channel name is not one the directory subscribes to.
    #[error("unknown bus channel: {0}")]
    UnknownChannel(String),

    /// Opcode is unknown or not valid on the channel it arrived on.
    #[error("opcode {opcode} not valid on channel {channel}")]
    InvalidOpcode {
        /// Channel the message arrived on.
        channel: String,
        /// Raw opcode byte.
        opcode: u8,
    },

    /// CBOR body failed to decode.
    #[error("malformed bus body: {0}")]
    Body(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ProtocolError::TooLarge { len: 70_000, max: 65_535 };
        assert_eq!(err.to_string(), "frame too large: 70000 bytes (max 65535)");

        let err = ProtocolError::ShortPayload { opcode: "destroy", len: 2, need: 4 };
        assert_eq!(err.to_string(), "short payload for destroy: 2 bytes (need 4)");
    }
}
