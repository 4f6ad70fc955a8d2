//! Modern frame format.
//!
//! ```text
//! +----------------+-----------------+---------------------+
//! | VarInt length  | VarInt raw id   | fields ...          |
//! +----------------+-----------------+---------------------+
//!                  |<------------ length bytes ----------->|
//! ```
//!
//! The length prefix counts the raw id and the fields, never itself.

use std::io::{self, Write};

use crate::error::{DecodeError, DecodeResult};
use crate::pool::PooledStream;

use super::varint::{decode_var_i32, encode_var_i32, var_i32_len, MAX_VARINT_LEN};

/// Parsed length prefix of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramePrefix {
    /// Bytes the prefix itself takes.
    pub prefix_len: usize,
    /// Bytes that follow the prefix (raw id + fields).
    pub body_len: usize,
}

impl FramePrefix {
    /// Prefix plus body.
    #[inline]
    pub fn total_len(&self) -> usize {
        self.prefix_len + self.body_len
    }
}

/// Parse a length prefix from the start of `data`.
///
/// Lengths that are negative or above `max_len` are `InvalidData`.
pub fn parse_prefix(data: &[u8], max_len: usize) -> DecodeResult<FramePrefix> {
    let (length, prefix_len) = decode_var_i32(data)?;
    if length < 0 {
        return Err(DecodeError::invalid(format!("negative frame length {length}")));
    }
    let body_len = length as usize;
    if body_len > max_len {
        return Err(DecodeError::invalid(format!(
            "frame of {body_len} bytes exceeds limit of {max_len}"
        )));
    }
    Ok(FramePrefix {
        prefix_len,
        body_len,
    })
}

/// Parse the length prefix at the front of a receive stream.
pub fn peek_prefix(stream: &PooledStream, max_len: usize) -> DecodeResult<FramePrefix> {
    let mut head = [0u8; MAX_VARINT_LEN];
    let n = stream.peek(0, &mut head);
    parse_prefix(&head[..n], max_len)
}

/// Append `VarInt(body.len()) || body` to `out`.
pub fn write_frame(out: &mut PooledStream, body: &PooledStream) -> io::Result<()> {
    let len = i32::try_from(body.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame body too large"))?;
    let mut prefix = [0u8; MAX_VARINT_LEN];
    let n = encode_var_i32(len, &mut prefix);
    out.write_all(&prefix[..n])?;
    for chunk in body.chunks() {
        out.write_all(chunk)?;
    }
    Ok(())
}

/// Build a complete frame from a raw id and encoded fields.
///
/// # Example
///
/// ```
/// use craftwire::protocol::build_frame;
///
/// let frame = build_frame(0x00, &[0x2A]);
/// assert_eq!(frame, vec![0x02, 0x00, 0x2A]);
/// ```
pub fn build_frame(raw_id: i32, fields: &[u8]) -> Vec<u8> {
    let body_len = var_i32_len(raw_id) + fields.len();
    let mut buf = Vec::with_capacity(var_i32_len(body_len as i32) + body_len);

    let mut scratch = [0u8; MAX_VARINT_LEN];
    let n = encode_var_i32(body_len as i32, &mut scratch);
    buf.extend_from_slice(&scratch[..n]);
    let n = encode_var_i32(raw_id, &mut scratch);
    buf.extend_from_slice(&scratch[..n]);
    buf.extend_from_slice(fields);
    buf
}

/// Split whole frames off the front of `data`.
///
/// Returns `(raw_id, fields)` for each complete frame and the number of bytes
/// consumed. A trailing partial frame is left in place.
pub fn split_frames(data: &[u8], max_len: usize) -> DecodeResult<(Vec<(i32, &[u8])>, usize)> {
    let mut frames = Vec::new();
    let mut offset = 0;
    loop {
        let prefix = match parse_prefix(&data[offset..], max_len) {
            Ok(prefix) => prefix,
            Err(DecodeError::NeedMoreData) => break,
            Err(e) => return Err(e),
        };
        if data.len() - offset < prefix.total_len() {
            break;
        }
        let body = &data[offset + prefix.prefix_len..offset + prefix.total_len()];
        let (raw_id, id_len) = decode_var_i32(body).map_err(|e| match e {
            DecodeError::NeedMoreData => DecodeError::invalid("frame too short for packet id"),
            other => other,
        })?;
        frames.push((raw_id, &body[id_len..]));
        offset += prefix.total_len();
    }
    Ok((frames, offset))
}
