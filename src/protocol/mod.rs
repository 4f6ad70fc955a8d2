//! Protocol module - VarInt codec, states, framing and the legacy ping.
//!
//! - VarInt/VarLong encoding shared by framing and payload fields
//! - Protocol states, packet directions and connection sides
//! - Length-prefixed frame parsing and building
//! - The pre-netty legacy ping probe and reply

mod frame;
pub mod legacy;
mod state;
pub mod varint;

pub use frame::{build_frame, parse_prefix, peek_prefix, split_frames, write_frame, FramePrefix};
pub use legacy::{legacy_reply, parse_legacy_reply, LegacyProbe, LEGACY_PROBE};
pub use state::{Direction, ProtocolState, Side};
