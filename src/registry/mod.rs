//! Packet identifiers and the per-state lookup tables.
//!
//! - [`PacketId`]: closed set of logical ids, each with one wire mapping
//! - [`ProtocolRegistry`]: raw id to payload type and back, per state and direction

mod ids;
mod protocol;

pub use ids::{PacketId, PacketMapping};
pub use protocol::{
    DisconnectFactory, PacketIdDefinition, ProtocolRegistry, ProtocolRegistryBuilder,
};
