//! Message types understood by the room itself.
//!
//! Application traffic uses arbitrary message-type bytes that the room never
//! interprets. The values below are reserved for the engine's own
//! notifications and for control requests addressed to [`Target::Server`].
//!
//! [`Target::Server`]: crate::Target::Server

use std::fmt;

/// Room-level message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// A peer joined the room (engine-emitted).
    NewConnection = 0,
    /// A peer left the room (engine-emitted).
    ExitConnection = 1,
    /// Create a game object owned by the sender.
    Instantiate = 2,
    /// Destroy a game object (owner only).
    Destroy = 3,
    /// Ask an object's owner to hand over control.
    RequestControlAuthority = 4,
    /// Hand an object over to another client (owner only).
    TransferControlAuthority = 5,
    /// Designate a client as host.
    MigrateHost = 6,
}

impl Opcode {
    /// Parse a raw message-type byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::NewConnection),
            1 => Some(Self::ExitConnection),
            2 => Some(Self::Instantiate),
            3 => Some(Self::Destroy),
            4 => Some(Self::RequestControlAuthority),
            5 => Some(Self::TransferControlAuthority),
            6 => Some(Self::MigrateHost),
            _ => None,
        }
    }

    /// Raw byte value.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Short lowercase name, used in logs and errors.
    pub fn name(self) -> &'static str {
        match self {
            Self::NewConnection => "new_connection",
            Self::ExitConnection => "exit_connection",
            Self::Instantiate => "instantiate",
            Self::Destroy => "destroy",
            Self::RequestControlAuthority => "request_control_authority",
            Self::TransferControlAuthority => "transfer_control_authority",
            Self::MigrateHost => "migrate_host",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_values_match_wire() {
        assert_eq!(Opcode::NewConnection.to_u8(), 0);
        assert_eq!(Opcode::ExitConnection.to_u8(), 1);
        assert_eq!(Opcode::MigrateHost.to_u8(), 6);
        assert_eq!(Opcode::from_u8(5), Some(Opcode::TransferControlAuthority));
        assert_eq!(Opcode::from_u8(7), None);
    }
}
