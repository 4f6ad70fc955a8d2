//! Standard payload definitions.
//!
//! Handshake, status, login and a small slice of play. Game code adds its own
//! payloads with [`packet!`](crate::packet) and registers them next to these.

mod handshake;
mod login;
mod play;
mod status;

pub use handshake::Handshake;
pub use login::{LoginDisconnect, LoginStart, LoginSuccess, SetCompression};
pub use play::{
    ChatClientbound, ChatServerbound, Disconnect, EntityHeadLook, JoinGame, KeepAliveClientbound,
    KeepAliveServerbound, PlayerPosition, PluginMessage, SpawnPosition,
};
pub use status::{StatusPing, StatusPong, StatusRequest, StatusResponse};

use crate::registry::ProtocolRegistryBuilder;

/// Wrap plain text in a chat JSON document.
pub(crate) fn chat_text(text: &str) -> String {
    serde_json::json!({ "text": text }).to_string()
}

/// Add every standard payload and the login/play disconnect packets.
pub fn register_standard(builder: ProtocolRegistryBuilder) -> ProtocolRegistryBuilder {
    builder
        .register::<Handshake>()
        .register::<StatusRequest>()
        .register::<StatusResponse>()
        .register::<StatusPing>()
        .register::<StatusPong>()
        .register::<LoginStart>()
        .register::<LoginSuccess>()
        .register::<LoginDisconnect>()
        .register::<SetCompression>()
        .register::<KeepAliveClientbound>()
        .register::<KeepAliveServerbound>()
        .register::<JoinGame>()
        .register::<ChatClientbound>()
        .register::<ChatServerbound>()
        .register::<SpawnPosition>()
        .register::<EntityHeadLook>()
        .register::<PlayerPosition>()
        .register::<PluginMessage>()
        .register::<Disconnect>()
        .disconnect_with::<LoginDisconnect>()
        .disconnect_with::<Disconnect>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt::Debug;
    use std::sync::Arc;

    use crate::codec::{
        Angle, BlockPosition, DisconnectPacket, OutboundPayload, Packet, PacketShape,
    };
    use crate::config::DEFAULT_MAX_PACKET_LENGTH;
    use crate::pool::{BufferManager, PooledStream};
    use crate::protocol::{build_frame, split_frames, Direction, ProtocolState};
    use crate::registry::{PacketId, ProtocolRegistry};

    fn registry() -> ProtocolRegistry {
        register_standard(ProtocolRegistry::builder()).build().unwrap()
    }

    fn round_trip<P: Packet + PartialEq + Debug>(registry: &ProtocolRegistry, packet: P) {
        let mut fields = Vec::new();
        packet.encode(&mut fields).unwrap();

        let mut stream = PooledStream::new(Arc::new(BufferManager::default()));
        packet.encode_into(&mut stream).unwrap();
        assert_eq!(stream.to_vec(), fields, "{}", P::NAME);

        let frame = build_frame(P::ID.raw_id(), &fields);
        let (frames, consumed) = split_frames(&frame, DEFAULT_MAX_PACKET_LENGTH).unwrap();
        assert_eq!(consumed, frame.len());
        assert_eq!(frames.len(), 1);

        let (raw_id, body) = frames[0];
        let (id, payload) = registry
            .decode_body(P::ID.state(), P::ID.direction(), raw_id, body)
            .unwrap();
        assert_eq!(id, P::ID);
        assert_eq!(*payload.downcast::<P>().unwrap(), packet);
    }

    #[test]
    fn test_every_standard_packet_round_trips() {
        let registry = registry();

        round_trip(
            &registry,
            Handshake {
                protocol_version: 47,
                server_address: "play.example.net".into(),
                server_port: 25565,
                next_state: 2,
            },
        );
        round_trip(&registry, StatusRequest {});
        round_trip(
            &registry,
            StatusResponse {
                json: r#"{"description":{"text":"hi"}}"#.into(),
            },
        );
        round_trip(&registry, StatusPing { payload: -42 });
        round_trip(&registry, StatusPong { payload: i64::MAX });
        round_trip(&registry, LoginStart { name: "Notch".into() });
        round_trip(
            &registry,
            LoginSuccess {
                uuid: 0x0123_4567_89AB_CDEF_0123_4567_89AB_CDEF,
                username: "Notch".into(),
            },
        );
        round_trip(&registry, LoginDisconnect::with_reason("full"));
        round_trip(&registry, SetCompression { threshold: 256 });
        round_trip(&registry, KeepAliveClientbound { keep_alive_id: 99 });
        round_trip(&registry, KeepAliveServerbound { keep_alive_id: 99 });
        round_trip(
            &registry,
            JoinGame {
                entity_id: 1,
                gamemode: 1,
                dimension: -1,
                difficulty: 2,
                max_players: 20,
                level_type: "default".into(),
                reduced_debug_info: false,
            },
        );
        round_trip(
            &registry,
            ChatClientbound {
                json: chat_text("héllo §a"),
                position: 0,
            },
        );
        round_trip(
            &registry,
            ChatServerbound {
                message: "/help".into(),
            },
        );
        round_trip(
            &registry,
            SpawnPosition {
                location: BlockPosition::new(-100, 64, 2048),
            },
        );
        round_trip(
            &registry,
            EntityHeadLook {
                entity_id: 7,
                head_yaw: Angle::from_degrees(90.0),
            },
        );
        round_trip(
            &registry,
            PlayerPosition {
                x: 0.5,
                feet_y: 64.0,
                z: -12.25,
                on_ground: true,
            },
        );
        round_trip(
            &registry,
            PluginMessage {
                channel: "MC|Brand".into(),
                data: b"vanilla".to_vec(),
            },
        );
        round_trip(&registry, Disconnect::with_reason("bye"));
    }

    #[test]
    fn test_every_logical_id_is_registered() {
        let registry = registry();
        assert_eq!(registry.len(), PacketId::ALL.len());
        for &id in PacketId::ALL {
            assert!(registry.by_id(id).is_some(), "{id}");
        }
    }

    #[test]
    fn test_disconnect_factories() {
        let registry = registry();
        for state in [ProtocolState::Login, ProtocolState::Play] {
            let factory = registry
                .disconnect_for(state, Direction::Clientbound)
                .unwrap();
            assert_eq!(factory("x").packet_id().state(), state);
        }
        assert!(registry
            .disconnect_for(ProtocolState::Status, Direction::Clientbound)
            .is_none());
    }

    #[test]
    fn test_disconnect_reason_is_chat_json() {
        let packet = Disconnect::with_reason("say \"hi\"");
        let value: serde_json::Value = serde_json::from_str(&packet.reason).unwrap();
        assert_eq!(value["text"], "say \"hi\"");
    }

    #[test]
    fn test_plugin_message_is_self_describing() {
        assert!(matches!(PluginMessage::shape(), PacketShape::SelfDescribing));

        let empty = PluginMessage::decode(&mut &[0x01, b'a'][..]).unwrap();
        assert_eq!(empty.channel, "a");
        assert!(empty.data.is_empty());
    }

    #[test]
    fn test_handshake_intent() {
        let mut handshake = Handshake {
            protocol_version: 47,
            server_address: String::new(),
            server_port: 0,
            next_state: 1,
        };
        assert_eq!(handshake.intent(), Some(ProtocolState::Status));
        handshake.next_state = 2;
        assert_eq!(handshake.intent(), Some(ProtocolState::Login));
        handshake.next_state = 3;
        assert_eq!(handshake.intent(), None);
    }
}
