//! # craftwire
//!
//! Network protocol engine for a length-framed, stateful block-game wire
//! format.
//!
//! It terminates TCP connections, splits the byte stream into frames, maps
//! raw packet ids to typed payloads through per-state tables, and encodes
//! outbound payloads on a small pool of send workers. Every socket buffer
//! comes from a shared block pool.
//!
//! ## Architecture
//!
//! - **Receive** (one read task per connection): pooled receive stream,
//!   frame detection, id resolution, one handler per packet id
//! - **Send** (fixed worker pool): lock-free queues, encoding into the
//!   connection's send stream, vectored flushes
//!
//! ## Example
//!
//! ```no_run
//! use craftwire::packets::{Handshake, StatusPing, StatusPong, StatusRequest, StatusResponse};
//! use craftwire::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> craftwire::Result<()> {
//!     let server = Server::builder(ServerConfig::default())
//!         .handle(|conn, handshake: Handshake| {
//!             if let Some(next) = handshake.intent() {
//!                 conn.set_state(next);
//!             }
//!             Ok(())
//!         })
//!         .handle(|conn, _: StatusRequest| {
//!             conn.send(StatusResponse { json: r#"{"description":"hi"}"#.into() })
//!         })
//!         .handle(|conn, ping: StatusPing| {
//!             conn.send(StatusPong { payload: ping.payload })?;
//!             conn.close();
//!             Ok(())
//!         })
//!         .build()?;
//!
//!     server.listen().await
//! }
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod packets;
pub mod pipeline;
pub mod pool;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod transport;
pub mod writer;

pub use codec::{DisconnectPacket, Packet};
pub use config::{BufferConfig, Compression, LegacyPingConfig, ServerConfig};
pub use connection::{Connection, ConnectionStats};
pub use error::{DecodeError, EncodeError, ProtocolError, Result};
pub use protocol::{Direction, ProtocolState, Side};
pub use registry::{PacketId, ProtocolRegistry};
pub use server::{Server, ServerBuilder};
