//! The `Packet` trait and the `packet!` generator.
//!
//! # Example
//!
//! ```
//! use craftwire::codec::{Packet, PacketShape, VarInt, Utf8};
//! use craftwire::packet;
//! use craftwire::registry::PacketId;
//!
//! packet! {
//!     #[derive(Debug, Clone, PartialEq)]
//!     pub struct Hello => PacketId::Handshake {
//!         pub protocol_version: i32 as VarInt,
//!         pub server_address: String as Utf8,
//!         pub server_port: u16,
//!         pub next_state: i32 as VarInt,
//!     }
//! }
//!
//! let hello = Hello {
//!     protocol_version: 47,
//!     server_address: "localhost".into(),
//!     server_port: 25565,
//!     next_state: 2,
//! };
//! let mut bytes = Vec::new();
//! hello.encode(&mut bytes).unwrap();
//! assert_eq!(Hello::decode(&mut &bytes[..]).unwrap(), hello);
//! assert!(matches!(Hello::shape(), PacketShape::FieldList(fields) if fields.len() == 4));
//! ```

use std::any::{Any, TypeId};

use bytes::Buf;

use super::schema::{PacketSchema, PacketShape};
use super::wire::WireWrite;
use crate::error::{DecodeResult, EncodeResult};
use crate::pool::PooledStream;
use crate::registry::PacketId;

/// A payload with a fixed logical id and a wire codec.
pub trait Packet: Sized + Send + 'static {
    /// Logical id; its mapping decides the state, direction and raw id.
    const ID: PacketId;
    /// Type name used in logs and errors.
    const NAME: &'static str;

    /// Static description of the wire layout.
    fn shape() -> PacketShape;

    /// Read the fields that follow the raw id.
    fn decode<B: Buf>(buf: &mut B) -> DecodeResult<Self>;

    /// Write the fields that follow the raw id.
    fn encode<W: WireWrite + ?Sized>(&self, out: &mut W) -> EncodeResult<()>;

    fn schema() -> PacketSchema {
        PacketSchema {
            name: Self::NAME,
            id: Self::ID,
            shape: Self::shape(),
        }
    }
}

/// A payload that can carry a human-readable disconnect reason.
///
/// Registering one per state lets the engine tell a peer why it is being
/// dropped.
pub trait DisconnectPacket: Packet {
    fn with_reason(reason: &str) -> Self;
}

/// Type-erased outbound payload, queued until a send worker encodes it.
pub trait OutboundPayload: Send + 'static {
    fn packet_id(&self) -> PacketId;

    fn packet_name(&self) -> &'static str;

    /// `TypeId` of the concrete payload.
    fn payload_type(&self) -> TypeId;

    fn encode_into(&self, out: &mut PooledStream) -> EncodeResult<()>;
}

impl<P: Packet> OutboundPayload for P {
    fn packet_id(&self) -> PacketId {
        P::ID
    }

    fn packet_name(&self) -> &'static str {
        P::NAME
    }

    fn payload_type(&self) -> TypeId {
        TypeId::of::<P>()
    }

    fn encode_into(&self, out: &mut PooledStream) -> EncodeResult<()> {
        self.encode(out)
    }
}

/// Type-erased decoded payload, handed from the registry to a handler.
pub type AnyPayload = Box<dyn Any + Send>;

/// Decode `P` and erase its type.
pub(crate) fn decode_erased<P: Packet>(mut buf: &mut dyn Buf) -> DecodeResult<AnyPayload> {
    P::decode(&mut buf).map(|payload| Box::new(payload) as AnyPayload)
}

#[doc(hidden)]
#[macro_export]
macro_rules! __field_codec {
    ($ty:ty) => {
        <$ty as $crate::codec::NativeCodec>::Codec
    };
    ($ty:ty, $codec:ty) => {
        $codec
    };
}

/// Declare a payload struct and derive its schema and codec.
///
/// Each field is `name: Type` (the type's native codec) or
/// `name: Type as Codec`. Fields are read and written in declaration order;
/// a decode error names the field that failed.
#[macro_export]
macro_rules! packet {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident => $id:path {
            $(
                $(#[$fmeta:meta])*
                $fvis:vis $field:ident : $ty:ty $(as $codec:ty)?
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $(
                $(#[$fmeta])*
                $fvis $field: $ty,
            )*
        }

        impl $crate::codec::Packet for $name {
            const ID: $crate::registry::PacketId = $id;
            const NAME: &'static str = stringify!($name);

            fn shape() -> $crate::codec::PacketShape {
                const FIELDS: &[$crate::codec::FieldDescriptor] = &[
                    $(
                        $crate::codec::FieldDescriptor {
                            name: stringify!($field),
                            wire: <$crate::__field_codec!($ty $(, $codec)?)
                                as $crate::codec::FieldCodec<$ty>>::WIRE,
                            length_prefix: <$crate::__field_codec!($ty $(, $codec)?)
                                as $crate::codec::FieldCodec<$ty>>::PREFIX,
                        },
                    )*
                ];
                $crate::codec::PacketShape::FieldList(FIELDS)
            }

            #[allow(unused_variables)]
            fn decode<B: $crate::codec::Buf>(
                buf: &mut B,
            ) -> $crate::error::DecodeResult<Self> {
                $(
                    let $field = <$crate::__field_codec!($ty $(, $codec)?)
                        as $crate::codec::FieldCodec<$ty>>::read(buf)
                        .map_err(|e| e.in_field(stringify!($name), stringify!($field)))?;
                )*
                Ok(Self { $($field),* })
            }

            #[allow(unused_variables)]
            fn encode<W: $crate::codec::WireWrite + ?Sized>(
                &self,
                out: &mut W,
            ) -> $crate::error::EncodeResult<()> {
                $(
                    <$crate::__field_codec!($ty $(, $codec)?)
                        as $crate::codec::FieldCodec<$ty>>::write(&self.$field, out)
                        .map_err(|e| e.in_field(stringify!($name), stringify!($field)))?;
                )*
                Ok(())
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{ByteArray, FieldDescriptor, LengthPrefix, Prefixed, VarInt, WireType, U8};
    use crate::error::DecodeError;

    crate::packet! {
        #[derive(Debug, Clone, PartialEq)]
        struct Sample => PacketId::ChatServerbound {
            id: i32 as VarInt,
            flag: bool,
            tags: Vec<i32> as Prefixed<VarInt, VarInt>,
            blob: Vec<u8> as ByteArray<U8>,
        }
    }

    crate::packet! {
        #[derive(Debug, Default, PartialEq)]
        struct Empty => PacketId::StatusRequest {}
    }

    fn sample() -> Sample {
        Sample {
            id: 300,
            flag: true,
            tags: vec![1, 2],
            blob: vec![0xAA],
        }
    }

    #[test]
    fn test_generated_schema() {
        let schema = Sample::schema();
        assert_eq!(schema.name, "Sample");
        assert_eq!(schema.id, PacketId::ChatServerbound);
        assert_eq!(
            schema.fields(),
            &[
                FieldDescriptor {
                    name: "id",
                    wire: WireType::VarInt,
                    length_prefix: None
                },
                FieldDescriptor {
                    name: "flag",
                    wire: WireType::Bool,
                    length_prefix: None
                },
                FieldDescriptor {
                    name: "tags",
                    wire: WireType::Array,
                    length_prefix: Some(LengthPrefix::VarInt)
                },
                FieldDescriptor {
                    name: "blob",
                    wire: WireType::ByteArray,
                    length_prefix: Some(LengthPrefix::U8)
                },
            ]
        );
        assert!(schema.validate().is_ok());
    }

    #[test]
    fn test_generated_codec_layout() {
        let mut out = Vec::new();
        sample().encode(&mut out).unwrap();
        assert_eq!(out, vec![0xAC, 0x02, 0x01, 0x02, 0x01, 0x02, 0x01, 0xAA]);
        assert_eq!(Sample::decode(&mut &out[..]).unwrap(), sample());
    }

    #[test]
    fn test_truncation_names_the_field() {
        let mut out = Vec::new();
        sample().encode(&mut out).unwrap();

        let err = Sample::decode(&mut &out[..4]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::InvalidData("Sample.tags: ran out of data".to_string())
        );
    }

    #[test]
    fn test_empty_packet() {
        let mut out = Vec::new();
        Empty {}.encode(&mut out).unwrap();
        assert!(out.is_empty());
        assert_eq!(Empty::decode(&mut &[][..]).unwrap(), Empty {});
        assert_eq!(Empty::schema().fields().len(), 0);
    }

    #[test]
    fn test_erased_payload() {
        let payload: Box<dyn OutboundPayload> = Box::new(sample());
        assert_eq!(payload.packet_id(), PacketId::ChatServerbound);
        assert_eq!(payload.packet_name(), "Sample");
        assert_eq!(payload.payload_type(), TypeId::of::<Sample>());

        let bytes = {
            let mut out = Vec::new();
            sample().encode(&mut out).unwrap();
            out
        };
        let mut buf = &bytes[..];
        let decoded = decode_erased::<Sample>(&mut buf).unwrap();
        assert_eq!(*decoded.downcast::<Sample>().unwrap(), sample());
    }
}
