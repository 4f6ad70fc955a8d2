//! Login sequence.

use crate::codec::{DisconnectPacket, Utf8, VarInt};
use crate::packet;
use crate::registry::PacketId;

use super::chat_text;

packet! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct LoginStart => PacketId::LoginStart {
        pub name: String as Utf8,
    }
}

packet! {
    /// Accepts the player; the connection moves to play afterwards.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct LoginSuccess => PacketId::LoginSuccess {
        pub uuid: u128,
        pub username: String as Utf8,
    }
}

packet! {
    /// Refuses the login. `reason` is a chat JSON document.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct LoginDisconnect => PacketId::LoginDisconnect {
        pub reason: String as Utf8,
    }
}

impl DisconnectPacket for LoginDisconnect {
    fn with_reason(reason: &str) -> Self {
        Self {
            reason: chat_text(reason),
        }
    }
}

packet! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SetCompression => PacketId::SetCompression {
        pub threshold: i32 as VarInt,
    }
}
