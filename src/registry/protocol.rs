//! Protocol registry: which payload type each raw id means, per state and
//! direction.
//!
//! Built once at startup from the payload types the server knows about, then
//! shared read-only behind an `Arc`.
//!
//! # Example
//!
//! ```
//! use craftwire::packets::{Handshake, LoginStart};
//! use craftwire::protocol::{Direction, ProtocolState};
//! use craftwire::registry::{PacketId, ProtocolRegistry};
//!
//! let registry = ProtocolRegistry::builder()
//!     .register::<Handshake>()
//!     .register::<LoginStart>()
//!     .build()
//!     .unwrap();
//!
//! let def = registry
//!     .inbound(ProtocolState::Login, Direction::Serverbound, 0x00)
//!     .unwrap();
//! assert_eq!(def.id, PacketId::LoginStart);
//! ```

use std::any::TypeId;
use std::collections::HashMap;

use bytes::Buf;

use crate::codec::packet::decode_erased;
use crate::codec::{AnyPayload, DisconnectPacket, OutboundPayload, Packet, PacketSchema};
use crate::error::{DecodeError, DecodeResult, ProtocolError, Result};
use crate::protocol::{Direction, ProtocolState};

use super::ids::PacketId;

type DecodeFn = fn(&mut dyn Buf) -> DecodeResult<AnyPayload>;

/// Builds the disconnect payload for a state.
pub type DisconnectFactory = fn(&str) -> Box<dyn OutboundPayload>;

fn make_disconnect<P: DisconnectPacket>(reason: &str) -> Box<dyn OutboundPayload> {
    Box::new(P::with_reason(reason))
}

/// One registered payload type and its wire placement.
#[derive(Debug, Clone)]
pub struct PacketIdDefinition {
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub id: PacketId,
    pub raw_id: i32,
    pub state: ProtocolState,
    pub direction: Direction,
    pub schema: PacketSchema,
    decode: DecodeFn,
}

impl PacketIdDefinition {
    fn of<P: Packet>() -> Self {
        let mapping = P::ID.mapping();
        Self {
            type_id: TypeId::of::<P>(),
            type_name: P::NAME,
            id: P::ID,
            raw_id: mapping.raw_id,
            state: mapping.state,
            direction: mapping.direction,
            schema: P::schema(),
            decode: decode_erased::<P>,
        }
    }

    /// Decode this payload from the bytes after the raw id.
    pub fn decode(&self, buf: &mut dyn Buf) -> DecodeResult<AnyPayload> {
        (self.decode)(buf)
    }
}

#[derive(Debug, Default)]
struct StateTable {
    by_raw: HashMap<i32, usize>,
    by_type: HashMap<TypeId, usize>,
}

/// Immutable id tables for every state and direction.
#[derive(Debug)]
pub struct ProtocolRegistry {
    definitions: Vec<PacketIdDefinition>,
    tables: HashMap<(ProtocolState, Direction), StateTable>,
    disconnects: HashMap<(ProtocolState, Direction), DisconnectFactory>,
}

impl ProtocolRegistry {
    pub fn builder() -> ProtocolRegistryBuilder {
        ProtocolRegistryBuilder::default()
    }

    /// Definition for a raw id received in `state`.
    pub fn inbound(
        &self,
        state: ProtocolState,
        direction: Direction,
        raw_id: i32,
    ) -> Option<&PacketIdDefinition> {
        let table = self.tables.get(&(state, direction))?;
        table.by_raw.get(&raw_id).map(|&i| &self.definitions[i])
    }

    /// Definition for a payload type sent in `state`.
    pub fn outbound(
        &self,
        state: ProtocolState,
        direction: Direction,
        type_id: TypeId,
    ) -> Option<&PacketIdDefinition> {
        let table = self.tables.get(&(state, direction))?;
        table.by_type.get(&type_id).map(|&i| &self.definitions[i])
    }

    /// Definition registered for `P`, wherever it lives.
    pub fn definition_of<P: Packet>(&self) -> Option<&PacketIdDefinition> {
        let mapping = P::ID.mapping();
        self.outbound(mapping.state, mapping.direction, TypeId::of::<P>())
    }

    /// Definition registered under a logical id.
    pub fn by_id(&self, id: PacketId) -> Option<&PacketIdDefinition> {
        let mapping = id.mapping();
        self.inbound(mapping.state, mapping.direction, mapping.raw_id)
    }

    /// Disconnect payload factory for `state`, if one was registered.
    pub fn disconnect_for(
        &self,
        state: ProtocolState,
        direction: Direction,
    ) -> Option<DisconnectFactory> {
        self.disconnects.get(&(state, direction)).copied()
    }

    /// Decode the fields of a frame received in `state`.
    ///
    /// `fields` holds everything after the raw id. Unknown ids, truncated
    /// payloads and bytes left over after the payload are `InvalidData`.
    pub fn decode(
        &self,
        state: ProtocolState,
        direction: Direction,
        raw_id: i32,
        fields: &mut dyn Buf,
    ) -> DecodeResult<(PacketId, AnyPayload)> {
        let def = self.inbound(state, direction, raw_id).ok_or_else(|| {
            DecodeError::invalid(format!("unknown packet id {raw_id:#04x} in state {state}"))
        })?;
        let payload = def.decode(fields).map_err(|e| match e {
            DecodeError::NeedMoreData => {
                DecodeError::invalid(format!("{} ran out of data", def.type_name))
            }
            other => other,
        })?;
        if fields.has_remaining() {
            return Err(DecodeError::invalid(format!(
                "{} left {} trailing bytes",
                def.type_name,
                fields.remaining()
            )));
        }
        Ok((def.id, payload))
    }

    /// [`decode`](Self::decode) over a slice.
    pub fn decode_body(
        &self,
        state: ProtocolState,
        direction: Direction,
        raw_id: i32,
        mut fields: &[u8],
    ) -> DecodeResult<(PacketId, AnyPayload)> {
        self.decode(state, direction, raw_id, &mut fields)
    }

    /// All definitions, in registration order.
    pub fn definitions(&self) -> impl Iterator<Item = &PacketIdDefinition> {
        self.definitions.iter()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

/// Collects payload types; all checks run in [`build`](Self::build).
#[derive(Default)]
pub struct ProtocolRegistryBuilder {
    definitions: Vec<PacketIdDefinition>,
    disconnects: Vec<(PacketId, &'static str, DisconnectFactory)>,
}

impl ProtocolRegistryBuilder {
    /// Add a payload type.
    pub fn register<P: Packet>(mut self) -> Self {
        self.definitions.push(PacketIdDefinition::of::<P>());
        self
    }

    /// Use `P` to carry kick reasons in its state. `P` must also be registered.
    pub fn disconnect_with<P: DisconnectPacket>(mut self) -> Self {
        self.disconnects
            .push((P::ID, P::NAME, make_disconnect::<P> as DisconnectFactory));
        self
    }

    /// Validate every schema and build the id tables.
    pub fn build(self) -> Result<ProtocolRegistry> {
        let mut tables: HashMap<(ProtocolState, Direction), StateTable> = HashMap::new();

        for (index, def) in self.definitions.iter().enumerate() {
            def.schema.validate()?;

            let table = tables.entry((def.state, def.direction)).or_default();
            if table.by_type.insert(def.type_id, index).is_some() {
                return Err(ProtocolError::DuplicatePacketType(def.type_name));
            }
            if let Some(&first) = table.by_raw.get(&def.raw_id) {
                return Err(ProtocolError::DuplicateRawId {
                    state: def.state,
                    raw_id: def.raw_id,
                    first: self.definitions[first].type_name,
                    second: def.type_name,
                });
            }
            table.by_raw.insert(def.raw_id, index);
        }

        let mut disconnects = HashMap::new();
        for (id, name, factory) in self.disconnects {
            let mapping = id.mapping();
            let registered = tables
                .get(&(mapping.state, mapping.direction))
                .is_some_and(|table| table.by_raw.contains_key(&mapping.raw_id));
            if !registered {
                return Err(ProtocolError::UnregisteredPacket {
                    packet: name,
                    state: mapping.state,
                });
            }
            if disconnects
                .insert((mapping.state, mapping.direction), factory)
                .is_some()
            {
                return Err(ProtocolError::Config(format!(
                    "second disconnect packet {name} for state {}",
                    mapping.state
                )));
            }
        }

        tracing::debug!(packets = self.definitions.len(), "protocol registry built");

        Ok(ProtocolRegistry {
            definitions: self.definitions,
            tables,
            disconnects,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Utf8, VarInt};
    use crate::packets::{Disconnect, Handshake, KeepAliveServerbound, LoginStart};

    crate::packet! {
        #[derive(Debug, PartialEq)]
        struct OtherLoginStart => PacketId::LoginStart {
            name: String as Utf8,
        }
    }

    crate::packet! {
        #[derive(Debug, PartialEq)]
        struct Probe => PacketId::KeepAliveServerbound {
            id: i32 as VarInt,
        }
    }

    #[test]
    fn test_lookup_both_ways() {
        let registry = ProtocolRegistry::builder()
            .register::<Handshake>()
            .register::<LoginStart>()
            .build()
            .unwrap();

        let def = registry
            .inbound(ProtocolState::Handshaking, Direction::Serverbound, 0x00)
            .unwrap();
        assert_eq!(def.id, PacketId::Handshake);
        assert_eq!(def.type_name, "Handshake");

        let def = registry.definition_of::<LoginStart>().unwrap();
        assert_eq!(def.state, ProtocolState::Login);
        assert_eq!(def.raw_id, 0x00);

        assert!(registry
            .inbound(ProtocolState::Login, Direction::Clientbound, 0x00)
            .is_none());
        assert!(registry
            .outbound(ProtocolState::Play, Direction::Serverbound, TypeId::of::<LoginStart>())
            .is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_duplicate_raw_id_rejected() {
        let err = ProtocolRegistry::builder()
            .register::<LoginStart>()
            .register::<OtherLoginStart>()
            .build()
            .unwrap_err();
        match err {
            ProtocolError::DuplicateRawId {
                state,
                raw_id,
                first,
                second,
            } => {
                assert_eq!(state, ProtocolState::Login);
                assert_eq!(raw_id, 0);
                assert_eq!(first, "LoginStart");
                assert_eq!(second, "OtherLoginStart");
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_duplicate_type_rejected() {
        let err = ProtocolRegistry::builder()
            .register::<Handshake>()
            .register::<Handshake>()
            .build()
            .unwrap_err();
        assert!(matches!(err, ProtocolError::DuplicatePacketType("Handshake")));
        assert!(err.is_setup_error());
    }

    #[test]
    fn test_same_raw_id_in_other_state_is_fine() {
        let registry = ProtocolRegistry::builder()
            .register::<Handshake>()
            .register::<LoginStart>()
            .register::<KeepAliveServerbound>()
            .build()
            .unwrap();
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_disconnect_requires_registration() {
        let err = ProtocolRegistry::builder()
            .disconnect_with::<Disconnect>()
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::UnregisteredPacket {
                packet: "Disconnect",
                state: ProtocolState::Play
            }
        ));

        let registry = ProtocolRegistry::builder()
            .register::<Disconnect>()
            .disconnect_with::<Disconnect>()
            .build()
            .unwrap();
        let factory = registry
            .disconnect_for(ProtocolState::Play, Direction::Clientbound)
            .unwrap();
        assert_eq!(factory("bye").packet_id(), PacketId::Disconnect);
        assert!(registry
            .disconnect_for(ProtocolState::Login, Direction::Clientbound)
            .is_none());
    }

    #[test]
    fn test_decode_body() {
        let registry = ProtocolRegistry::builder()
            .register::<Probe>()
            .build()
            .unwrap();

        let (id, payload) = registry
            .decode_body(ProtocolState::Play, Direction::Serverbound, 0x00, &[0x07])
            .unwrap();
        assert_eq!(id, PacketId::KeepAliveServerbound);
        assert_eq!(*payload.downcast::<Probe>().unwrap(), Probe { id: 7 });

        let trailing =
            registry.decode_body(ProtocolState::Play, Direction::Serverbound, 0x00, &[0x07, 0x00]);
        assert!(matches!(trailing, Err(DecodeError::InvalidData(_))));

        let unknown =
            registry.decode_body(ProtocolState::Play, Direction::Serverbound, 0x7F, &[]);
        assert!(matches!(unknown, Err(DecodeError::InvalidData(r)) if r.contains("0x7f")));
    }
}
