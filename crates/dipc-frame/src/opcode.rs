//! Frame opcodes.

use crate::error::FrameError;

/// The fixed opcode set understood by the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Opcode {
    /// Client hello carrying protocol version and application id.
    Handshake = 0,
    /// Commands, responses and dispatched events.
    Frame = 1,
    /// Connection teardown, either direction.
    Close = 2,
    /// Keepalive request.
    Ping = 3,
    /// Keepalive reply.
    Pong = 4,
}

impl Opcode {
    /// All opcodes in wire order.
    pub const ALL: [Opcode; 5] = [
        Opcode::Handshake,
        Opcode::Frame,
        Opcode::Close,
        Opcode::Ping,
        Opcode::Pong,
    ];

    /// Wire value.
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            Opcode::Handshake => "HANDSHAKE",
            Opcode::Frame => "FRAME",
            Opcode::Close => "CLOSE",
            Opcode::Ping => "PING",
            Opcode::Pong => "PONG",
        }
    }
}

impl TryFrom<u32> for Opcode {
    type Error = FrameError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Opcode::Handshake),
            1 => Ok(Opcode::Frame),
            2 => Ok(Opcode::Close),
            3 => Ok(Opcode::Ping),
            4 => Ok(Opcode::Pong),
            other => Err(FrameError::Protocol(other)),
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_values_are_stable() {
        let values: Vec<u32> = Opcode::ALL.iter().map(|op| op.as_u32()).collect();
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
        for op in Opcode::ALL {
            assert_eq!(Opcode::try_from(op.as_u32()).unwrap(), op);
        }
    }

    #[test]
    fn out_of_range_is_protocol_error() {
        assert!(matches!(Opcode::try_from(5), Err(FrameError::Protocol(5))));
        assert!(matches!(Opcode::try_from(99), Err(FrameError::Protocol(99))));
    }
}
