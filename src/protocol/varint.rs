//! Variable-length integer encoding.
//!
//! Each byte carries 7 value bits, least significant group first. The high bit
//! is a continuation flag:
//!
//! ```text
//! 300 = 0b1_0010_1100
//!   -> 0xAC (0b0010_1100 | 0x80), 0x02
//! ```
//!
//! Negative numbers are encoded as their two's complement bit pattern, so
//! `-1` always takes the maximum length (5 bytes for VarInt, 10 for VarLong).

use bytes::Buf;

use crate::error::{DecodeError, DecodeResult};

/// Longest legal VarInt encoding.
pub const MAX_VARINT_LEN: usize = 5;

/// Longest legal VarLong encoding.
pub const MAX_VARLONG_LEN: usize = 10;

const SEGMENT_BITS: u8 = 0x7F;
const CONTINUE_BIT: u8 = 0x80;

/// Encode a 32-bit VarInt into `buf`, returning the number of bytes used.
pub fn encode_var_i32(value: i32, buf: &mut [u8; MAX_VARINT_LEN]) -> usize {
    let mut remaining = value as u32;
    let mut i = 0;
    while remaining >= CONTINUE_BIT as u32 {
        buf[i] = (remaining as u8) | CONTINUE_BIT;
        remaining >>= 7;
        i += 1;
    }
    buf[i] = remaining as u8;
    i + 1
}

/// Encode a 64-bit VarLong into `buf`, returning the number of bytes used.
pub fn encode_var_i64(value: i64, buf: &mut [u8; MAX_VARLONG_LEN]) -> usize {
    let mut remaining = value as u64;
    let mut i = 0;
    while remaining >= CONTINUE_BIT as u64 {
        buf[i] = (remaining as u8) | CONTINUE_BIT;
        remaining >>= 7;
        i += 1;
    }
    buf[i] = remaining as u8;
    i + 1
}

/// Number of bytes `value` takes as a VarInt.
#[inline]
pub fn var_i32_len(value: i32) -> usize {
    let bits = 32 - (value as u32).leading_zeros() as usize;
    bits.max(1).div_ceil(7)
}

/// Number of bytes `value` takes as a VarLong.
#[inline]
pub fn var_i64_len(value: i64) -> usize {
    let bits = 64 - (value as u64).leading_zeros() as usize;
    bits.max(1).div_ceil(7)
}

/// Decode a VarInt from the front of `data`.
///
/// Returns the value and the number of bytes consumed.
pub fn decode_var_i32(data: &[u8]) -> DecodeResult<(i32, usize)> {
    let mut value: u32 = 0;
    for (i, &byte) in data.iter().take(MAX_VARINT_LEN).enumerate() {
        value |= ((byte & SEGMENT_BITS) as u32) << (7 * i);
        if byte & CONTINUE_BIT == 0 {
            return Ok((value as i32, i + 1));
        }
    }
    if data.len() >= MAX_VARINT_LEN {
        Err(DecodeError::invalid("VarInt is too long"))
    } else {
        Err(DecodeError::NeedMoreData)
    }
}

/// Decode a VarLong from the front of `data`.
pub fn decode_var_i64(data: &[u8]) -> DecodeResult<(i64, usize)> {
    let mut value: u64 = 0;
    for (i, &byte) in data.iter().take(MAX_VARLONG_LEN).enumerate() {
        value |= ((byte & SEGMENT_BITS) as u64) << (7 * i);
        if byte & CONTINUE_BIT == 0 {
            return Ok((value as i64, i + 1));
        }
    }
    if data.len() >= MAX_VARLONG_LEN {
        Err(DecodeError::invalid("VarLong is too long"))
    } else {
        Err(DecodeError::NeedMoreData)
    }
}

/// Read a VarInt from a buffer, consuming its bytes.
pub fn read_var_i32<B: Buf + ?Sized>(buf: &mut B) -> DecodeResult<i32> {
    let mut value: u32 = 0;
    for i in 0..MAX_VARINT_LEN {
        if !buf.has_remaining() {
            return Err(DecodeError::NeedMoreData);
        }
        let byte = buf.get_u8();
        value |= ((byte & SEGMENT_BITS) as u32) << (7 * i);
        if byte & CONTINUE_BIT == 0 {
            return Ok(value as i32);
        }
    }
    Err(DecodeError::invalid("VarInt is too long"))
}

/// Read a VarLong from a buffer, consuming its bytes.
pub fn read_var_i64<B: Buf + ?Sized>(buf: &mut B) -> DecodeResult<i64> {
    let mut value: u64 = 0;
    for i in 0..MAX_VARLONG_LEN {
        if !buf.has_remaining() {
            return Err(DecodeError::NeedMoreData);
        }
        let byte = buf.get_u8();
        value |= ((byte & SEGMENT_BITS) as u64) << (7 * i);
        if byte & CONTINUE_BIT == 0 {
            return Ok(value as i64);
        }
    }
    Err(DecodeError::invalid("VarLong is too long"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn enc32(value: i32) -> Vec<u8> {
        let mut buf = [0u8; MAX_VARINT_LEN];
        let n = encode_var_i32(value, &mut buf);
        buf[..n].to_vec()
    }

    fn enc64(value: i64) -> Vec<u8> {
        let mut buf = [0u8; MAX_VARLONG_LEN];
        let n = encode_var_i64(value, &mut buf);
        buf[..n].to_vec()
    }

    #[test]
    fn test_known_encodings() {
        assert_eq!(enc32(0), vec![0x00]);
        assert_eq!(enc32(1), vec![0x01]);
        assert_eq!(enc32(127), vec![0x7F]);
        assert_eq!(enc32(128), vec![0x80, 0x01]);
        assert_eq!(enc32(255), vec![0xFF, 0x01]);
        assert_eq!(enc32(300), vec![0xAC, 0x02]);
        assert_eq!(enc32(25565), vec![0xDD, 0xC7, 0x01]);
        assert_eq!(enc32(2_097_151), vec![0xFF, 0xFF, 0x7F]);
        assert_eq!(enc32(i32::MAX), vec![0xFF, 0xFF, 0xFF, 0xFF, 0x07]);
        assert_eq!(enc32(-1), vec![0xFF, 0xFF, 0xFF, 0xFF, 0x0F]);
        assert_eq!(enc32(i32::MIN), vec![0x80, 0x80, 0x80, 0x80, 0x08]);
    }

    #[test]
    fn test_known_varlong_encodings() {
        assert_eq!(enc64(0), vec![0x00]);
        assert_eq!(enc64(2_147_483_647), vec![0xFF, 0xFF, 0xFF, 0xFF, 0x07]);
        assert_eq!(
            enc64(i64::MAX),
            vec![0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x7F]
        );
        assert_eq!(
            enc64(-1),
            vec![0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01]
        );
    }

    #[test]
    fn test_len_helpers_match_encoders() {
        for v in [0, 1, 127, 128, 16383, 16384, i32::MAX, -1, i32::MIN] {
            assert_eq!(var_i32_len(v), enc32(v).len(), "value {v}");
        }
        for v in [0i64, 127, 128, i64::MAX, -1, i64::MIN] {
            assert_eq!(var_i64_len(v), enc64(v).len(), "value {v}");
        }
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let (value, used) = decode_var_i32(&[0xAC, 0x02, 0xFF, 0xFF]).unwrap();
        assert_eq!(value, 300);
        assert_eq!(used, 2);
    }

    #[test]
    fn test_empty_input_needs_more_data() {
        assert_eq!(decode_var_i32(&[]), Err(DecodeError::NeedMoreData));
        assert_eq!(decode_var_i64(&[]), Err(DecodeError::NeedMoreData));
    }

    #[test]
    fn test_too_long_varint_is_invalid() {
        let data = [0x80, 0x80, 0x80, 0x80, 0x80, 0x01];
        assert!(matches!(
            decode_var_i32(&data),
            Err(DecodeError::InvalidData(_))
        ));

        let mut buf = &data[..];
        assert!(matches!(
            read_var_i32(&mut buf),
            Err(DecodeError::InvalidData(_))
        ));
    }

    #[test]
    fn test_too_long_varlong_is_invalid() {
        let data = [0xFFu8; 11];
        assert!(matches!(
            decode_var_i64(&data),
            Err(DecodeError::InvalidData(_))
        ));
    }

    #[test]
    fn test_read_from_buf_advances() {
        let data = [0xDD, 0xC7, 0x01, 0x05];
        let mut buf = &data[..];
        assert_eq!(read_var_i32(&mut buf).unwrap(), 25565);
        assert_eq!(buf, &[0x05]);
    }

    proptest! {
        #[test]
        fn prop_var_i32_round_trip(value in any::<i32>()) {
            let bytes = enc32(value);
            prop_assert_eq!(decode_var_i32(&bytes), Ok((value, bytes.len())));
            let mut buf = &bytes[..];
            prop_assert_eq!(read_var_i32(&mut buf), Ok(value));
            prop_assert!(buf.is_empty());
        }

        #[test]
        fn prop_var_i64_round_trip(value in any::<i64>()) {
            let bytes = enc64(value);
            prop_assert_eq!(decode_var_i64(&bytes), Ok((value, bytes.len())));
            let mut buf = &bytes[..];
            prop_assert_eq!(read_var_i64(&mut buf), Ok(value));
        }

        #[test]
        fn prop_var_i32_prefix_needs_more_data(value in any::<i32>()) {
            let bytes = enc32(value);
            for cut in 0..bytes.len() {
                prop_assert_eq!(decode_var_i32(&bytes[..cut]), Err(DecodeError::NeedMoreData));
            }
        }

        #[test]
        fn prop_var_i64_prefix_needs_more_data(value in any::<i64>()) {
            let bytes = enc64(value);
            for cut in 0..bytes.len() {
                prop_assert_eq!(decode_var_i64(&bytes[..cut]), Err(DecodeError::NeedMoreData));
            }
        }
    }
}
