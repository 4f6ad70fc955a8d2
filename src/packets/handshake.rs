//! The first packet of every modern connection.

use crate::codec::{Utf8, VarInt};
use crate::packet;
use crate::protocol::ProtocolState;
use crate::registry::PacketId;

packet! {
    /// Client intent: which state to enter next.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Handshake => PacketId::Handshake {
        pub protocol_version: i32 as VarInt,
        pub server_address: String as Utf8,
        pub server_port: u16,
        pub next_state: i32 as VarInt,
    }
}

impl Handshake {
    /// State requested by `next_state`, if it names a valid one.
    pub fn intent(&self) -> Option<ProtocolState> {
        ProtocolState::from_handshake_intent(self.next_state)
    }
}
