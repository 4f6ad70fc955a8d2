//! Login Server - status, login and a minimal play session.
//!
//! This example demonstrates:
//! - Building a server and wiring handlers per packet type
//! - Answering the server list ping (modern and legacy)
//! - Moving a client from login into play
//! - Graceful shutdown on Ctrl-C
//!
//! # Running
//!
//! ```sh
//! RUST_LOG=craftwire=debug cargo run --example login_server -- [config.json]
//! ```
//!
//! then add `localhost` to a 1.8 client's server list.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use craftwire::codec::BlockPosition;
use craftwire::packets::{
    ChatClientbound, ChatServerbound, Handshake, JoinGame, KeepAliveServerbound, LoginStart,
    LoginSuccess, SpawnPosition, StatusPing, StatusPong, StatusRequest, StatusResponse,
};
use craftwire::{ProtocolState, Server, ServerConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    let motd = config.legacy_ping.motd.clone();
    let max_players = config.legacy_ping.max_players;
    let next_entity = Arc::new(AtomicU64::new(1));

    let server = Server::builder(config)
        .on_connected(|conn| info!(conn = conn.id(), peer = ?conn.peer(), "client connected"))
        .on_disconnected(|conn| {
            let stats = conn.stats();
            info!(
                conn = conn.id(),
                sent = stats.bytes_sent,
                received = stats.bytes_received,
                "client left"
            );
        })
        .handle(|conn, handshake: Handshake| {
            match handshake.intent() {
                Some(next) => {
                    conn.set_state(next);
                }
                None => conn.kick("Unsupported handshake intent"),
            }
            Ok(())
        })
        .handle(move |conn, _: StatusRequest| {
            let json = serde_json::json!({
                "version": { "name": "1.8.9", "protocol": 47 },
                "players": { "max": max_players, "online": 0 },
                "description": { "text": motd },
            });
            conn.send(StatusResponse {
                json: json.to_string(),
            })
        })
        .handle(|conn, ping: StatusPing| {
            conn.send(StatusPong {
                payload: ping.payload,
            })?;
            conn.close();
            Ok(())
        })
        .handle(move |conn, login: LoginStart| {
            let entity_id = next_entity.fetch_add(1, Ordering::Relaxed);
            info!(conn = conn.id(), name = %login.name, "player joining");

            conn.send(LoginSuccess {
                uuid: u128::from(entity_id),
                username: login.name,
            })?;
            conn.set_state(ProtocolState::Play);
            conn.send(JoinGame {
                entity_id: entity_id as i32,
                gamemode: 1,
                dimension: 0,
                difficulty: 1,
                max_players: 20,
                level_type: "flat".into(),
                reduced_debug_info: false,
            })?;
            conn.send(SpawnPosition {
                location: BlockPosition::new(0, 64, 0),
            })
        })
        .handle(|_conn, _: KeepAliveServerbound| Ok(()))
        .handle(|conn, chat: ChatServerbound| {
            info!(conn = conn.id(), message = %chat.message, "chat");
            conn.send(ChatClientbound {
                json: serde_json::json!({ "text": chat.message }).to_string(),
                position: 0,
            })
        })
        .build()?;

    let serving = {
        let server = server.clone();
        tokio::spawn(async move { server.listen().await })
    };

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    server.shutdown().await;
    serving.await??;

    Ok(())
}
