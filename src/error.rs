//! Error types for craftwire.

use thiserror::Error;

use crate::protocol::ProtocolState;
use crate::registry::PacketId;

/// Outcome of a failed read from a byte source.
///
/// `NeedMoreData` is not a protocol violation: the receive pipeline stops and
/// waits for the next read. `InvalidData` always ends the connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The source ran out before the value was complete.
    #[error("need more data")]
    NeedMoreData,

    /// The bytes can never form a valid value.
    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl DecodeError {
    /// Build an `InvalidData` error from anything printable.
    pub fn invalid(reason: impl Into<String>) -> Self {
        DecodeError::InvalidData(reason.into())
    }

    /// Attach packet and field context.
    ///
    /// Inside a complete frame running out of bytes means the frame is
    /// truncated, so `NeedMoreData` is turned into `InvalidData` here.
    pub fn in_field(self, packet: &str, field: &str) -> Self {
        match self {
            DecodeError::NeedMoreData => {
                DecodeError::InvalidData(format!("{packet}.{field}: ran out of data"))
            }
            DecodeError::InvalidData(reason) => {
                DecodeError::InvalidData(format!("{packet}.{field}: {reason}"))
            }
        }
    }
}

/// Result type for field and frame decoding.
pub type DecodeResult<T> = std::result::Result<T, DecodeError>;

/// A value that cannot be represented on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot encode {0}")]
pub struct EncodeError(pub String);

impl EncodeError {
    /// Prefix the reason with packet and field names.
    pub fn in_field(self, packet: &str, field: &str) -> Self {
        EncodeError(format!("{packet}.{field}: {}", self.0))
    }
}

/// Result type for field encoding.
pub type EncodeResult<T> = std::result::Result<T, EncodeError>;

/// Main error type for all craftwire operations.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// I/O error on the transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while loading configuration.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Framing or payload decoding failed.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// An outbound payload could not be encoded.
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    /// Two payload types map to the same raw id in one state and direction.
    #[error("raw id {raw_id:#04x} registered twice in {state:?}: {first} and {second}")]
    DuplicateRawId {
        state: ProtocolState,
        raw_id: i32,
        first: &'static str,
        second: &'static str,
    },

    /// The same payload type was registered twice for one state.
    #[error("packet type {0} registered twice")]
    DuplicatePacketType(&'static str),

    /// A second handler was registered for a logical id.
    #[error("handler for {0:?} registered twice")]
    DuplicateHandler(PacketId),

    /// A payload schema failed validation.
    #[error("invalid schema for {packet}: {reason}")]
    InvalidSchema { packet: &'static str, reason: String },

    /// Invalid startup configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A frame was resolved but nobody handles its id.
    #[error("no handler registered for {0:?}")]
    HandlerNotFound(PacketId),

    /// A payload type has no definition in the given state.
    #[error("packet {packet} is not registered in state {state:?}")]
    UnregisteredPacket {
        packet: &'static str,
        state: ProtocolState,
    },

    /// A buffer of the wrong size was handed back to the pool.
    #[error("buffer of {0} bytes does not match any pool size class")]
    InvalidBuffer(usize),

    /// Compression is recognized but not implemented.
    #[error("compression is not supported")]
    CompressionUnsupported,

    /// The connection is closed or closing.
    #[error("connection closed")]
    ConnectionClosed,
}

impl ProtocolError {
    /// True for errors that can only happen while the server is being built.
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            ProtocolError::DuplicateRawId { .. }
                | ProtocolError::DuplicatePacketType(_)
                | ProtocolError::DuplicateHandler(_)
                | ProtocolError::InvalidSchema { .. }
                | ProtocolError::Config(_)
                | ProtocolError::CompressionUnsupported
        )
    }
}

/// Result type alias using ProtocolError.
pub type Result<T> = std::result::Result<T, ProtocolError>;
