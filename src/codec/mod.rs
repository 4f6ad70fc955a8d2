//! Payload codecs.
//!
//! - [`schema`]: static field descriptions validated at registry build
//! - [`field`]: primitive field codecs and their marker types
//! - [`wire`]: the [`WireWrite`] sink and decode bounds checks
//! - [`packet`]: the [`Packet`] trait and the [`packet!`](crate::packet) generator

pub mod field;
pub mod packet;
pub mod schema;
pub mod wire;

pub use bytes::Buf;

pub use field::{
    Angle, BlockPosition, Bool, ByteArray, FieldCodec, LengthCodec, NativeCodec, PackedPosition,
    Prefixed, RotationAngle, Utf16, Utf8, Uuid, VarInt, VarLong, F32, F64, I16, I32, I64, I8,
    U16, U8,
};
pub use packet::{AnyPayload, DisconnectPacket, OutboundPayload, Packet};
pub use schema::{FieldDescriptor, LengthPrefix, PacketSchema, PacketShape, WireType};
pub use wire::{need, WireWrite};
