//! Server list ping.

use crate::codec::Utf8;
use crate::packet;
use crate::registry::PacketId;

packet! {
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct StatusRequest => PacketId::StatusRequest {}
}

packet! {
    /// Status document. The JSON is carried as opaque text.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct StatusResponse => PacketId::StatusResponse {
        pub json: String as Utf8,
    }
}

packet! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusPing => PacketId::StatusPing {
        pub payload: i64,
    }
}

packet! {
    /// Echo of [`StatusPing::payload`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusPong => PacketId::StatusPong {
        pub payload: i64,
    }
}
