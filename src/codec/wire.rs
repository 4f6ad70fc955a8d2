//! Byte sinks for encoding and bounds checks for decoding.
//!
//! Decoding reads from any [`bytes::Buf`]. `Buf`'s getters panic when the
//! source is short, so every fixed-width read goes through [`need`] first.
//!
//! Encoding writes to a [`WireWrite`] sink. The trait is implemented for
//! [`PooledStream`], `Vec<u8>` and `BytesMut`; all multi-byte values are
//! big-endian.

use bytes::{Buf, BytesMut};

use crate::error::{DecodeError, DecodeResult};
use crate::pool::PooledStream;
use crate::protocol::varint::{encode_var_i32, encode_var_i64, MAX_VARINT_LEN, MAX_VARLONG_LEN};

/// Fail with `NeedMoreData` unless `buf` holds at least `n` more bytes.
#[inline]
pub fn need<B: Buf + ?Sized>(buf: &B, n: usize) -> DecodeResult<()> {
    if buf.remaining() < n {
        Err(DecodeError::NeedMoreData)
    } else {
        Ok(())
    }
}

/// Append-only byte sink.
pub trait WireWrite {
    /// Append raw bytes.
    fn put_slice(&mut self, src: &[u8]);

    #[inline]
    fn put_u8(&mut self, value: u8) {
        self.put_slice(&[value]);
    }

    #[inline]
    fn put_i8(&mut self, value: i8) {
        self.put_slice(&value.to_be_bytes());
    }

    #[inline]
    fn put_u16(&mut self, value: u16) {
        self.put_slice(&value.to_be_bytes());
    }

    #[inline]
    fn put_i16(&mut self, value: i16) {
        self.put_slice(&value.to_be_bytes());
    }

    #[inline]
    fn put_i32(&mut self, value: i32) {
        self.put_slice(&value.to_be_bytes());
    }

    #[inline]
    fn put_i64(&mut self, value: i64) {
        self.put_slice(&value.to_be_bytes());
    }

    #[inline]
    fn put_u64(&mut self, value: u64) {
        self.put_slice(&value.to_be_bytes());
    }

    #[inline]
    fn put_f32(&mut self, value: f32) {
        self.put_slice(&value.to_be_bytes());
    }

    #[inline]
    fn put_f64(&mut self, value: f64) {
        self.put_slice(&value.to_be_bytes());
    }

    /// Append a VarInt.
    fn put_var_i32(&mut self, value: i32) {
        let mut buf = [0u8; MAX_VARINT_LEN];
        let n = encode_var_i32(value, &mut buf);
        self.put_slice(&buf[..n]);
    }

    /// Append a VarLong.
    fn put_var_i64(&mut self, value: i64) {
        let mut buf = [0u8; MAX_VARLONG_LEN];
        let n = encode_var_i64(value, &mut buf);
        self.put_slice(&buf[..n]);
    }
}

impl WireWrite for PooledStream {
    #[inline]
    fn put_slice(&mut self, src: &[u8]) {
        self.write_bytes(src);
    }
}

impl WireWrite for Vec<u8> {
    #[inline]
    fn put_slice(&mut self, src: &[u8]) {
        self.extend_from_slice(src);
    }
}

impl WireWrite for BytesMut {
    #[inline]
    fn put_slice(&mut self, src: &[u8]) {
        self.extend_from_slice(src);
    }
}
