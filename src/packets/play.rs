//! A subset of the play state.

use bytes::Buf;

use crate::codec::{
    Angle, BlockPosition, DisconnectPacket, FieldCodec, Packet, PacketShape, Utf8, VarInt,
    WireWrite,
};
use crate::error::{DecodeResult, EncodeResult};
use crate::packet;
use crate::registry::PacketId;

use super::chat_text;

packet! {
    /// Liveness probe; the client echoes `keep_alive_id`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct KeepAliveClientbound => PacketId::KeepAliveClientbound {
        pub keep_alive_id: i32 as VarInt,
    }
}

packet! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct KeepAliveServerbound => PacketId::KeepAliveServerbound {
        pub keep_alive_id: i32 as VarInt,
    }
}

packet! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct JoinGame => PacketId::JoinGame {
        pub entity_id: i32,
        pub gamemode: u8,
        pub dimension: i8,
        pub difficulty: u8,
        pub max_players: u8,
        pub level_type: String as Utf8,
        pub reduced_debug_info: bool,
    }
}

packet! {
    /// Chat line shown to the player. `position` 0 is the chat box.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ChatClientbound => PacketId::ChatClientbound {
        pub json: String as Utf8,
        pub position: i8,
    }
}

packet! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ChatServerbound => PacketId::ChatServerbound {
        pub message: String as Utf8,
    }
}

packet! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SpawnPosition => PacketId::SpawnPosition {
        pub location: BlockPosition,
    }
}

packet! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EntityHeadLook => PacketId::EntityHeadLook {
        pub entity_id: i32 as VarInt,
        pub head_yaw: Angle,
    }
}

packet! {
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct PlayerPosition => PacketId::PlayerPosition {
        pub x: f64,
        pub feet_y: f64,
        pub z: f64,
        pub on_ground: bool,
    }
}

packet! {
    /// Kicks the player. `reason` is a chat JSON document.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Disconnect => PacketId::Disconnect {
        pub reason: String as Utf8,
    }
}

impl DisconnectPacket for Disconnect {
    fn with_reason(reason: &str) -> Self {
        Self {
            reason: chat_text(reason),
        }
    }
}

/// Mod channel message. `data` runs to the end of the frame, so its length
/// comes from the frame rather than from a prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginMessage {
    pub channel: String,
    pub data: Vec<u8>,
}

impl Packet for PluginMessage {
    const ID: PacketId = PacketId::PluginMessage;
    const NAME: &'static str = "PluginMessage";

    fn shape() -> PacketShape {
        PacketShape::SelfDescribing
    }

    fn decode<B: Buf>(buf: &mut B) -> DecodeResult<Self> {
        let channel = <Utf8 as FieldCodec<String>>::read(buf)
            .map_err(|e| e.in_field(Self::NAME, "channel"))?;
        let data = buf.copy_to_bytes(buf.remaining()).to_vec();
        Ok(Self { channel, data })
    }

    fn encode<W: WireWrite + ?Sized>(&self, out: &mut W) -> EncodeResult<()> {
        <Utf8 as FieldCodec<String>>::write(&self.channel, out)
            .map_err(|e| e.in_field(Self::NAME, "channel"))?;
        out.put_slice(&self.data);
        Ok(())
    }
}
