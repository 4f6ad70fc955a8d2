//! Pre-netty server list ping.
//!
//! Old clients open with `0xFE 0x01` instead of a length prefix. The reply is
//! not framed:
//!
//! ```text
//! 0xFF | u16 length in UTF-16 code units | UTF-16BE "motd§online§max"
//! ```
//!
//! and the connection is closed right after it is written.

use crate::pool::PooledStream;

/// First two bytes sent by a legacy client.
pub const LEGACY_PROBE: [u8; 2] = [0xFE, 0x01];

/// Marker byte that opens the reply.
pub const LEGACY_REPLY_MARKER: u8 = 0xFF;

const FIELD_SEPARATOR: char = '\u{00A7}';

/// Outcome of inspecting the first bytes of a fresh connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyProbe {
    /// The bytes are the legacy probe.
    Detected,
    /// The bytes start a modern frame.
    Absent,
    /// Not enough bytes yet to tell.
    Undecided,
}

/// Inspect the start of a receive stream for the legacy probe.
pub fn detect(stream: &PooledStream) -> LegacyProbe {
    let mut head = [0u8; 2];
    match stream.peek(0, &mut head) {
        0 => LegacyProbe::Undecided,
        1 if head[0] == LEGACY_PROBE[0] => LegacyProbe::Undecided,
        1 => LegacyProbe::Absent,
        _ if head == LEGACY_PROBE => LegacyProbe::Detected,
        _ => LegacyProbe::Absent,
    }
}

/// Encode the legacy reply.
///
/// # Example
///
/// ```
/// use craftwire::protocol::legacy_reply;
///
/// let reply = legacy_reply("hi", 0, 8);
/// assert_eq!(reply[0], 0xFF);
/// assert_eq!(&reply[1..3], &[0x00, 0x06]); // "hi§0§8" is six code units
/// ```
pub fn legacy_reply(motd: &str, online: usize, max_players: u32) -> Vec<u8> {
    let text = format!("{motd}{FIELD_SEPARATOR}{online}{FIELD_SEPARATOR}{max_players}");
    let mut budget = u16::MAX as usize;
    let mut units = Vec::with_capacity(text.len().min(budget));
    for c in text.chars() {
        let width = c.len_utf16();
        if width > budget {
            break;
        }
        budget -= width;
        units.extend_from_slice(c.encode_utf16(&mut [0u16; 2]));
    }

    let mut out = Vec::with_capacity(3 + units.len() * 2);
    out.push(LEGACY_REPLY_MARKER);
    out.extend_from_slice(&(units.len() as u16).to_be_bytes());
    for unit in units {
        out.extend_from_slice(&unit.to_be_bytes());
    }
    out
}

/// Decode a legacy reply into `(motd, online, max_players)` text fields.
pub fn parse_legacy_reply(data: &[u8]) -> Option<Vec<String>> {
    let (&marker, rest) = data.split_first()?;
    if marker != LEGACY_REPLY_MARKER || rest.len() < 2 {
        return None;
    }
    let units = u16::from_be_bytes([rest[0], rest[1]]) as usize;
    let body = rest.get(2..2 + units * 2)?;
    let code_units: Vec<u16> = body
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    let text = String::from_utf16(&code_units).ok()?;
    Some(text.split(FIELD_SEPARATOR).map(str::to_owned).collect())
}
