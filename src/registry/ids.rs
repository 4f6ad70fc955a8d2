//! Logical packet ids and their wire mappings.

use std::fmt;

use crate::protocol::{Direction, ProtocolState};

/// Where a logical id lives on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PacketMapping {
    pub state: ProtocolState,
    pub direction: Direction,
    pub raw_id: i32,
}

macro_rules! packet_ids {
    (
        $(
            $(#[$meta:meta])*
            $name:ident => ($state:ident, $direction:ident, $raw:expr)
        ),* $(,)?
    ) => {
        /// Logical packet identifier.
        ///
        /// Each member carries exactly one `(state, direction, raw id)`
        /// mapping, see [`PacketId::mapping`].
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum PacketId {
            $(
                $(#[$meta])*
                $name,
            )*
        }

        impl PacketId {
            /// Every logical id, in declaration order.
            pub const ALL: &'static [PacketId] = &[$(PacketId::$name),*];

            /// Wire placement of this id.
            pub const fn mapping(self) -> PacketMapping {
                match self {
                    $(
                        PacketId::$name => PacketMapping {
                            state: ProtocolState::$state,
                            direction: Direction::$direction,
                            raw_id: $raw,
                        },
                    )*
                }
            }

            pub const fn name(self) -> &'static str {
                match self {
                    $(PacketId::$name => stringify!($name),)*
                }
            }
        }
    };
}

packet_ids! {
    /// Opens every modern connection.
    Handshake => (Handshaking, Serverbound, 0x00),

    StatusRequest => (Status, Serverbound, 0x00),
    StatusPing => (Status, Serverbound, 0x01),
    StatusResponse => (Status, Clientbound, 0x00),
    StatusPong => (Status, Clientbound, 0x01),

    LoginStart => (Login, Serverbound, 0x00),
    /// Disconnect while logging in.
    LoginDisconnect => (Login, Clientbound, 0x00),
    LoginSuccess => (Login, Clientbound, 0x02),
    SetCompression => (Login, Clientbound, 0x03),

    KeepAliveClientbound => (Play, Clientbound, 0x00),
    JoinGame => (Play, Clientbound, 0x01),
    ChatClientbound => (Play, Clientbound, 0x02),
    SpawnPosition => (Play, Clientbound, 0x05),
    EntityHeadLook => (Play, Clientbound, 0x19),
    /// Disconnect while in game.
    Disconnect => (Play, Clientbound, 0x40),

    KeepAliveServerbound => (Play, Serverbound, 0x00),
    ChatServerbound => (Play, Serverbound, 0x01),
    PlayerPosition => (Play, Serverbound, 0x04),
    PluginMessage => (Play, Serverbound, 0x17),
}

impl PacketId {
    #[inline]
    pub const fn state(self) -> ProtocolState {
        self.mapping().state
    }

    #[inline]
    pub const fn direction(self) -> Direction {
        self.mapping().direction
    }

    #[inline]
    pub const fn raw_id(self) -> i32 {
        self.mapping().raw_id
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mapping = self.mapping();
        write!(
            f,
            "{} ({} {:?} {:#04x})",
            self.name(),
            mapping.state,
            mapping.direction,
            mapping.raw_id
        )
    }
}
