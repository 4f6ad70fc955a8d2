//! Protocol states, packet directions and connection sides.

use std::fmt;

/// Coarse phase of a connection.
///
/// The state decides which raw ids map to which payload types. Handlers move
/// a connection forward (handshake, login success); `Closing` and
/// `Disconnected` are only entered through close requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ProtocolState {
    /// Fresh connection, waiting for the handshake (or a legacy ping).
    Handshaking = 0,
    /// Server list ping.
    Status = 1,
    /// Authentication.
    Login = 2,
    /// In game.
    Play = 3,
    /// Queued output may still be flushed, nothing is read.
    Closing = 4,
    /// No further reads or writes.
    Disconnected = 5,
    /// In-process connection with no wire ids mapped.
    Loopback = 6,
}

impl ProtocolState {
    /// Decode the atomic representation.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ProtocolState::Handshaking),
            1 => Some(ProtocolState::Status),
            2 => Some(ProtocolState::Login),
            3 => Some(ProtocolState::Play),
            4 => Some(ProtocolState::Closing),
            5 => Some(ProtocolState::Disconnected),
            6 => Some(ProtocolState::Loopback),
            _ => None,
        }
    }

    /// Map the `next_state` field of a handshake to a state.
    pub fn from_handshake_intent(next_state: i32) -> Option<Self> {
        match next_state {
            1 => Some(ProtocolState::Status),
            2 => Some(ProtocolState::Login),
            _ => None,
        }
    }

    /// True once the connection no longer accepts inbound frames.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, ProtocolState::Closing | ProtocolState::Disconnected)
    }

    /// True while the transport may still be written to.
    #[inline]
    pub fn can_write(self) -> bool {
        self != ProtocolState::Disconnected
    }
}

impl fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProtocolState::Handshaking => "handshaking",
            ProtocolState::Status => "status",
            ProtocolState::Login => "login",
            ProtocolState::Play => "play",
            ProtocolState::Closing => "closing",
            ProtocolState::Disconnected => "disconnected",
            ProtocolState::Loopback => "loopback",
        };
        f.write_str(name)
    }
}

/// Which peer sends a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client to server.
    Serverbound,
    /// Server to client.
    Clientbound,
}

/// Which end of the connection this process is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Accepts connections, reads serverbound packets.
    Server,
    /// Opens connections, reads clientbound packets.
    Client,
}

impl Side {
    /// Direction of packets this side receives.
    #[inline]
    pub fn inbound(self) -> Direction {
        match self {
            Side::Server => Direction::Serverbound,
            Side::Client => Direction::Clientbound,
        }
    }

    /// Direction of packets this side sends.
    #[inline]
    pub fn outbound(self) -> Direction {
        match self {
            Side::Server => Direction::Clientbound,
            Side::Client => Direction::Serverbound,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u8_round_trip() {
        for state in [
            ProtocolState::Handshaking,
            ProtocolState::Status,
            ProtocolState::Login,
            ProtocolState::Play,
            ProtocolState::Closing,
            ProtocolState::Disconnected,
            ProtocolState::Loopback,
        ] {
            assert_eq!(ProtocolState::from_u8(state as u8), Some(state));
        }
        assert_eq!(ProtocolState::from_u8(42), None);
    }

    #[test]
    fn test_handshake_intent() {
        assert_eq!(
            ProtocolState::from_handshake_intent(1),
            Some(ProtocolState::Status)
        );
        assert_eq!(
            ProtocolState::from_handshake_intent(2),
            Some(ProtocolState::Login)
        );
        assert_eq!(ProtocolState::from_handshake_intent(3), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(ProtocolState::Closing.is_terminal());
        assert!(ProtocolState::Disconnected.is_terminal());
        assert!(!ProtocolState::Play.is_terminal());
        assert!(ProtocolState::Closing.can_write());
        assert!(!ProtocolState::Disconnected.can_write());
    }

    #[test]
    fn test_side_directions() {
        assert_eq!(Side::Server.inbound(), Direction::Serverbound);
        assert_eq!(Side::Server.outbound(), Direction::Clientbound);
        assert_eq!(Side::Client.inbound(), Direction::Clientbound);
    }
}
