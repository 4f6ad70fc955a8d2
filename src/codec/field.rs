//! Primitive field codecs.
//!
//! A codec is a zero-sized marker type implementing [`FieldCodec<T>`] for the
//! Rust type `T` it reads and writes. The marker is what the `packet!` macro
//! names after `as`; when a field has no `as`, the type's [`NativeCodec`] is
//! used. A field type with neither does not compile.
//!
//! | Marker            | Rust type        | Wire                                  |
//! |-------------------|------------------|---------------------------------------|
//! | `Bool`            | `bool`           | 1 byte, 0 or 1                        |
//! | `I8` .. `I64`     | integers         | fixed width, big-endian               |
//! | `F32`, `F64`      | floats           | IEEE 754, big-endian                  |
//! | `VarInt`          | `i32`            | 1-5 bytes                             |
//! | `VarLong`         | `i64`            | 1-10 bytes                            |
//! | `Utf16`           | `String`         | u16 code units, then UTF-16BE         |
//! | `Utf8`            | `String`         | VarInt bytes, then UTF-8              |
//! | `Uuid`            | `u128`           | 16 bytes                              |
//! | `PackedPosition`  | `BlockPosition`  | x:26 y:12 z:26 in one i64             |
//! | `RotationAngle`   | `Angle`          | 1 byte, 1/256 turn                    |
//! | `ByteArray<P>`    | `Vec<u8>`        | length as `P`, then bytes             |
//! | `Prefixed<P, C>`  | `Vec<T>`         | count as `P`, then each element as `C`|

use std::marker::PhantomData;

use bytes::Buf;

use super::schema::{LengthPrefix, WireType};
use super::wire::{need, WireWrite};
use crate::error::{DecodeError, DecodeResult, EncodeError, EncodeResult};
use crate::protocol::varint::{read_var_i32, read_var_i64};

/// Reads and writes values of `T` in one wire encoding.
pub trait FieldCodec<T> {
    /// Wire type recorded in the schema.
    const WIRE: WireType;
    /// Length prefix recorded in the schema, for collections.
    const PREFIX: Option<LengthPrefix> = None;

    fn read<B: Buf>(buf: &mut B) -> DecodeResult<T>;

    fn write<W: WireWrite + ?Sized>(value: &T, out: &mut W) -> EncodeResult<()>;
}

/// Default codec for a Rust type.
pub trait NativeCodec: Sized {
    type Codec: FieldCodec<Self>;
}

/// Integer widths usable as a length prefix.
pub trait LengthCodec {
    const PREFIX: LengthPrefix;

    fn read_len<B: Buf>(buf: &mut B) -> DecodeResult<usize>;

    fn write_len<W: WireWrite + ?Sized>(len: usize, out: &mut W) -> EncodeResult<()>;
}

fn checked_len(raw: i64) -> DecodeResult<usize> {
    usize::try_from(raw).map_err(|_| DecodeError::invalid(format!("negative length {raw}")))
}

fn too_long(len: usize, prefix: LengthPrefix) -> EncodeError {
    EncodeError(format!("length {len} does not fit a {prefix:?} prefix"))
}

macro_rules! fixed_codec {
    ($marker:ident, $ty:ty, $wire:ident, $size:expr, $get:ident, $put:ident) => {
        #[doc = concat!("Fixed-width `", stringify!($ty), "`.")]
        #[derive(Debug, Clone, Copy)]
        pub struct $marker;

        impl FieldCodec<$ty> for $marker {
            const WIRE: WireType = WireType::$wire;

            #[inline]
            fn read<B: Buf>(buf: &mut B) -> DecodeResult<$ty> {
                need(buf, $size)?;
                Ok(buf.$get())
            }

            #[inline]
            fn write<W: WireWrite + ?Sized>(value: &$ty, out: &mut W) -> EncodeResult<()> {
                out.$put(*value);
                Ok(())
            }
        }

        impl NativeCodec for $ty {
            type Codec = $marker;
        }
    };
}

fixed_codec!(I8, i8, I8, 1, get_i8, put_i8);
fixed_codec!(U8, u8, U8, 1, get_u8, put_u8);
fixed_codec!(I16, i16, I16, 2, get_i16, put_i16);
fixed_codec!(U16, u16, U16, 2, get_u16, put_u16);
fixed_codec!(I32, i32, I32, 4, get_i32, put_i32);
fixed_codec!(I64, i64, I64, 8, get_i64, put_i64);
fixed_codec!(F32, f32, F32, 4, get_f32, put_f32);
fixed_codec!(F64, f64, F64, 8, get_f64, put_f64);

/// One byte, `0x00` or `0x01`.
#[derive(Debug, Clone, Copy)]
pub struct Bool;

impl FieldCodec<bool> for Bool {
    const WIRE: WireType = WireType::Bool;

    fn read<B: Buf>(buf: &mut B) -> DecodeResult<bool> {
        need(buf, 1)?;
        match buf.get_u8() {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(DecodeError::invalid(format!("bool byte {other:#04x}"))),
        }
    }

    fn write<W: WireWrite + ?Sized>(value: &bool, out: &mut W) -> EncodeResult<()> {
        out.put_u8(u8::from(*value));
        Ok(())
    }
}

impl NativeCodec for bool {
    type Codec = Bool;
}

/// 32-bit variable-length integer.
#[derive(Debug, Clone, Copy)]
pub struct VarInt;

impl FieldCodec<i32> for VarInt {
    const WIRE: WireType = WireType::VarInt;

    fn read<B: Buf>(buf: &mut B) -> DecodeResult<i32> {
        read_var_i32(buf)
    }

    fn write<W: WireWrite + ?Sized>(value: &i32, out: &mut W) -> EncodeResult<()> {
        out.put_var_i32(*value);
        Ok(())
    }
}

/// 64-bit variable-length integer.
#[derive(Debug, Clone, Copy)]
pub struct VarLong;

impl FieldCodec<i64> for VarLong {
    const WIRE: WireType = WireType::VarLong;

    fn read<B: Buf>(buf: &mut B) -> DecodeResult<i64> {
        read_var_i64(buf)
    }

    fn write<W: WireWrite + ?Sized>(value: &i64, out: &mut W) -> EncodeResult<()> {
        out.put_var_i64(*value);
        Ok(())
    }
}

/// UTF-16BE text with a u16 prefix counting code units. Default for `String`.
#[derive(Debug, Clone, Copy)]
pub struct Utf16;

impl FieldCodec<String> for Utf16 {
    const WIRE: WireType = WireType::Utf16String;

    fn read<B: Buf>(buf: &mut B) -> DecodeResult<String> {
        need(buf, 2)?;
        let units = buf.get_u16() as usize;
        need(buf, units * 2)?;
        let code_units: Vec<u16> = (0..units).map(|_| buf.get_u16()).collect();
        String::from_utf16(&code_units).map_err(|_| DecodeError::invalid("malformed UTF-16"))
    }

    fn write<W: WireWrite + ?Sized>(value: &String, out: &mut W) -> EncodeResult<()> {
        let units = value.encode_utf16().count();
        let prefix = u16::try_from(units).map_err(|_| too_long(units, LengthPrefix::U16))?;
        out.put_u16(prefix);
        for unit in value.encode_utf16() {
            out.put_u16(unit);
        }
        Ok(())
    }
}

impl NativeCodec for String {
    type Codec = Utf16;
}

/// UTF-8 text with a VarInt prefix counting bytes.
#[derive(Debug, Clone, Copy)]
pub struct Utf8;

impl FieldCodec<String> for Utf8 {
    const WIRE: WireType = WireType::Utf8String;

    fn read<B: Buf>(buf: &mut B) -> DecodeResult<String> {
        let len = checked_len(read_var_i32(buf)?.into())?;
        need(buf, len)?;
        let mut bytes = vec![0u8; len];
        buf.copy_to_slice(&mut bytes);
        String::from_utf8(bytes).map_err(|_| DecodeError::invalid("malformed UTF-8"))
    }

    fn write<W: WireWrite + ?Sized>(value: &String, out: &mut W) -> EncodeResult<()> {
        VarInt::write_len(value.len(), out)?;
        out.put_slice(value.as_bytes());
        Ok(())
    }
}

/// 128-bit UUID as two big-endian halves.
#[derive(Debug, Clone, Copy)]
pub struct Uuid;

impl FieldCodec<u128> for Uuid {
    const WIRE: WireType = WireType::Uuid;

    fn read<B: Buf>(buf: &mut B) -> DecodeResult<u128> {
        need(buf, 16)?;
        Ok(buf.get_u128())
    }

    fn write<W: WireWrite + ?Sized>(value: &u128, out: &mut W) -> EncodeResult<()> {
        out.put_slice(&value.to_be_bytes());
        Ok(())
    }
}

impl NativeCodec for u128 {
    type Codec = Uuid;
}

/// Integer block coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BlockPosition {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPosition {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Pack as `x:26 | y:12 | z:26`, each two's complement.
    pub fn pack(self) -> i64 {
        ((self.x as i64 & 0x3FF_FFFF) << 38)
            | ((self.y as i64 & 0xFFF) << 26)
            | (self.z as i64 & 0x3FF_FFFF)
    }

    /// Inverse of [`pack`](Self::pack); sign-extends each component.
    pub fn unpack(packed: i64) -> Self {
        Self {
            x: (packed >> 38) as i32,
            y: ((packed << 26) >> 52) as i32,
            z: ((packed << 38) >> 38) as i32,
        }
    }
}

/// Block position packed into one i64.
#[derive(Debug, Clone, Copy)]
pub struct PackedPosition;

impl FieldCodec<BlockPosition> for PackedPosition {
    const WIRE: WireType = WireType::Position;

    fn read<B: Buf>(buf: &mut B) -> DecodeResult<BlockPosition> {
        need(buf, 8)?;
        Ok(BlockPosition::unpack(buf.get_i64()))
    }

    fn write<W: WireWrite + ?Sized>(value: &BlockPosition, out: &mut W) -> EncodeResult<()> {
        out.put_i64(value.pack());
        Ok(())
    }
}

impl NativeCodec for BlockPosition {
    type Codec = PackedPosition;
}

/// Rotation in steps of 1/256 of a full turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Angle(pub u8);

impl Angle {
    /// Nearest step to `degrees`, wrapping.
    pub fn from_degrees(degrees: f32) -> Self {
        Angle((degrees.rem_euclid(360.0) * 256.0 / 360.0).round() as i32 as u8)
    }

    pub fn degrees(self) -> f32 {
        self.0 as f32 * 360.0 / 256.0
    }
}

/// One-byte rotation angle.
#[derive(Debug, Clone, Copy)]
pub struct RotationAngle;

impl FieldCodec<Angle> for RotationAngle {
    const WIRE: WireType = WireType::Angle;

    fn read<B: Buf>(buf: &mut B) -> DecodeResult<Angle> {
        need(buf, 1)?;
        Ok(Angle(buf.get_u8()))
    }

    fn write<W: WireWrite + ?Sized>(value: &Angle, out: &mut W) -> EncodeResult<()> {
        out.put_u8(value.0);
        Ok(())
    }
}

impl NativeCodec for Angle {
    type Codec = RotationAngle;
}

impl LengthCodec for U8 {
    const PREFIX: LengthPrefix = LengthPrefix::U8;

    fn read_len<B: Buf>(buf: &mut B) -> DecodeResult<usize> {
        need(buf, 1)?;
        Ok(buf.get_u8() as usize)
    }

    fn write_len<W: WireWrite + ?Sized>(len: usize, out: &mut W) -> EncodeResult<()> {
        let len = u8::try_from(len).map_err(|_| too_long(len, LengthPrefix::U8))?;
        out.put_u8(len);
        Ok(())
    }
}

impl LengthCodec for I16 {
    const PREFIX: LengthPrefix = LengthPrefix::I16;

    fn read_len<B: Buf>(buf: &mut B) -> DecodeResult<usize> {
        need(buf, 2)?;
        checked_len(buf.get_i16().into())
    }

    fn write_len<W: WireWrite + ?Sized>(len: usize, out: &mut W) -> EncodeResult<()> {
        let len = i16::try_from(len).map_err(|_| too_long(len, LengthPrefix::I16))?;
        out.put_i16(len);
        Ok(())
    }
}

impl LengthCodec for U16 {
    const PREFIX: LengthPrefix = LengthPrefix::U16;

    fn read_len<B: Buf>(buf: &mut B) -> DecodeResult<usize> {
        need(buf, 2)?;
        Ok(buf.get_u16() as usize)
    }

    fn write_len<W: WireWrite + ?Sized>(len: usize, out: &mut W) -> EncodeResult<()> {
        let len = u16::try_from(len).map_err(|_| too_long(len, LengthPrefix::U16))?;
        out.put_u16(len);
        Ok(())
    }
}

impl LengthCodec for I32 {
    const PREFIX: LengthPrefix = LengthPrefix::I32;

    fn read_len<B: Buf>(buf: &mut B) -> DecodeResult<usize> {
        need(buf, 4)?;
        checked_len(buf.get_i32().into())
    }

    fn write_len<W: WireWrite + ?Sized>(len: usize, out: &mut W) -> EncodeResult<()> {
        let len = i32::try_from(len).map_err(|_| too_long(len, LengthPrefix::I32))?;
        out.put_i32(len);
        Ok(())
    }
}

impl LengthCodec for VarInt {
    const PREFIX: LengthPrefix = LengthPrefix::VarInt;

    fn read_len<B: Buf>(buf: &mut B) -> DecodeResult<usize> {
        checked_len(read_var_i32(buf)?.into())
    }

    fn write_len<W: WireWrite + ?Sized>(len: usize, out: &mut W) -> EncodeResult<()> {
        let len = i32::try_from(len).map_err(|_| too_long(len, LengthPrefix::VarInt))?;
        out.put_var_i32(len);
        Ok(())
    }
}

/// Raw bytes behind a `P` length prefix.
pub struct ByteArray<P>(PhantomData<P>);

impl<P: LengthCodec> FieldCodec<Vec<u8>> for ByteArray<P> {
    const WIRE: WireType = WireType::ByteArray;
    const PREFIX: Option<LengthPrefix> = Some(P::PREFIX);

    fn read<B: Buf>(buf: &mut B) -> DecodeResult<Vec<u8>> {
        let len = P::read_len(buf)?;
        need(buf, len)?;
        let mut bytes = vec![0u8; len];
        buf.copy_to_slice(&mut bytes);
        Ok(bytes)
    }

    fn write<W: WireWrite + ?Sized>(value: &Vec<u8>, out: &mut W) -> EncodeResult<()> {
        P::write_len(value.len(), out)?;
        out.put_slice(value);
        Ok(())
    }
}

/// `P` element count, then each element encoded with `C`.
pub struct Prefixed<P, C>(PhantomData<(P, C)>);

impl<T, P: LengthCodec, C: FieldCodec<T>> FieldCodec<Vec<T>> for Prefixed<P, C> {
    const WIRE: WireType = WireType::Array;
    const PREFIX: Option<LengthPrefix> = Some(P::PREFIX);

    fn read<B: Buf>(buf: &mut B) -> DecodeResult<Vec<T>> {
        let count = P::read_len(buf)?;
        // Every element takes at least one byte, so the source bounds the allocation.
        let mut items = Vec::with_capacity(count.min(buf.remaining()));
        for _ in 0..count {
            items.push(C::read(buf)?);
        }
        Ok(items)
    }

    fn write<W: WireWrite + ?Sized>(value: &Vec<T>, out: &mut W) -> EncodeResult<()> {
        P::write_len(value.len(), out)?;
        for item in value {
            C::write(item, out)?;
        }
        Ok(())
    }
}
