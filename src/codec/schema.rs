//! Static payload schemas.
//!
//! Every payload type describes its wire shape once, as data. The registry
//! validates that description at startup and keeps it next to the type's
//! id mapping so tooling can inspect what a packet looks like.

use std::collections::HashSet;
use std::fmt;

use crate::error::{ProtocolError, Result};
use crate::registry::PacketId;

/// Primitive wire encoding of one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireType {
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    I64,
    F32,
    F64,
    VarInt,
    VarLong,
    /// UTF-16BE text, u16 prefix counting code units.
    Utf16String,
    /// UTF-8 text, VarInt prefix counting bytes.
    Utf8String,
    /// 128-bit UUID, two big-endian u64 halves.
    Uuid,
    /// Block position packed into one i64.
    Position,
    /// Rotation in 1/256 turns.
    Angle,
    /// Raw bytes behind a length prefix.
    ByteArray,
    /// Repeated elements behind a count prefix.
    Array,
}

impl WireType {
    /// True for wire types that carry an explicit length prefix.
    pub fn is_collection(self) -> bool {
        matches!(self, WireType::ByteArray | WireType::Array)
    }
}

/// Integer width used for a collection's length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LengthPrefix {
    U8,
    I16,
    U16,
    I32,
    VarInt,
}

/// One field of a flat payload, in serialization order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub wire: WireType,
    pub length_prefix: Option<LengthPrefix>,
}

/// How a payload is laid out on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketShape {
    /// Fields written back to back in declaration order.
    FieldList(&'static [FieldDescriptor]),
    /// The payload reads and writes itself.
    SelfDescribing,
}

/// Schema of one payload type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketSchema {
    pub name: &'static str,
    pub id: PacketId,
    pub shape: PacketShape,
}

impl PacketSchema {
    /// Fields in order, empty for self-describing payloads.
    pub fn fields(&self) -> &'static [FieldDescriptor] {
        match self.shape {
            PacketShape::FieldList(fields) => fields,
            PacketShape::SelfDescribing => &[],
        }
    }

    /// Reject malformed field lists.
    pub fn validate(&self) -> Result<()> {
        let PacketShape::FieldList(fields) = self.shape else {
            return Ok(());
        };

        let mut seen = HashSet::with_capacity(fields.len());
        for field in fields {
            if !seen.insert(field.name) {
                return Err(self.invalid(format!("duplicate field `{}`", field.name)));
            }
            match (field.wire.is_collection(), field.length_prefix) {
                (true, None) => {
                    return Err(self.invalid(format!(
                        "field `{}` is a {:?} without a length prefix",
                        field.name, field.wire
                    )))
                }
                (false, Some(prefix)) => {
                    return Err(self.invalid(format!(
                        "field `{}` has a {prefix:?} length prefix but is a {:?}",
                        field.name, field.wire
                    )))
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn invalid(&self, reason: String) -> ProtocolError {
        ProtocolError::InvalidSchema {
            packet: self.name,
            reason,
        }
    }
}

impl fmt::Display for PacketSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.name, self.id)?;
        match self.shape {
            PacketShape::SelfDescribing => f.write_str(" <self-describing>"),
            PacketShape::FieldList(fields) => {
                f.write_str(" {")?;
                for (i, field) in fields.iter().enumerate() {
                    let sep = if i == 0 { " " } else { ", " };
                    write!(f, "{sep}{}: {:?}", field.name, field.wire)?;
                    if let Some(prefix) = field.length_prefix {
                        write!(f, "[{prefix:?}]")?;
                    }
                }
                f.write_str(" }")
            }
        }
    }
}
