//! Server builder and runtime loops.
//!
//! The [`ServerBuilder`] collects payload types, handlers and lifecycle
//! callbacks, and checks all of them in [`build`](ServerBuilder::build)
//! before any socket is opened. The [`Server`] then:
//! 1. Binds the listener
//! 2. Accepts connections and spawns one read task each
//! 3. Runs the send workers
//! 4. Tears everything down on [`shutdown`](Server::shutdown)
//!
//! # Example
//!
//! ```no_run
//! use craftwire::packets::{Handshake, LoginStart, LoginSuccess};
//! use craftwire::protocol::ProtocolState;
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
//!         .handle(|conn, start: LoginStart| {
//!             conn.send(LoginSuccess { uuid: 0, username: start.name })?;
//!             conn.set_state(ProtocolState::Play);
//!             Ok(())
//!         })
//!         .build()?;
//!
//!     server.listen().await
//! }
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::codec::{DisconnectPacket, Packet};
use crate::config::{LegacyPingConfig, ServerConfig};
use crate::connection::Connection;
use crate::error::{ProtocolError, Result};
use crate::handler::{HandlerRegistry, HandlerResult};
use crate::packets;
use crate::pipeline::{Flow, InboundPipeline, LegacyResponder};
use crate::pool::{BufferManager, PoolStats, PooledStream};
use crate::protocol::{ProtocolState, Side};
use crate::registry::{ProtocolRegistry, ProtocolRegistryBuilder};
use crate::transport;
use crate::writer::{SendOrchestrator, WriterConfig};

type ConnectionCallback = Arc<dyn Fn(&Arc<Connection>) + Send + Sync>;

/// Builder for configuring and creating a [`Server`].
///
/// Starts with every standard payload registered.
pub struct ServerBuilder {
    config: ServerConfig,
    protocol: ProtocolRegistryBuilder,
    handlers: HandlerRegistry,
    pending_error: Option<ProtocolError>,
    on_connected: Option<ConnectionCallback>,
    on_disconnected: Option<ConnectionCallback>,
}

impl ServerBuilder {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            protocol: packets::register_standard(ProtocolRegistry::builder()),
            handlers: HandlerRegistry::new(),
            pending_error: None,
            on_connected: None,
            on_disconnected: None,
        }
    }

    /// Register an additional payload type.
    pub fn register<P: Packet>(mut self) -> Self {
        self.protocol = self.protocol.register::<P>();
        self
    }

    /// Use `P` to carry kick reasons in its state.
    pub fn disconnect_with<P: DisconnectPacket>(mut self) -> Self {
        self.protocol = self.protocol.disconnect_with::<P>();
        self
    }

    /// Register the handler for payload `P`.
    ///
    /// A second handler for the same id makes [`build`](Self::build) fail.
    pub fn handle<P, F>(mut self, handler: F) -> Self
    where
        P: Packet,
        F: Fn(&Arc<Connection>, P) -> HandlerResult + Send + Sync + 'static,
    {
        if let Err(e) = self.handlers.register::<P, F>(handler) {
            self.pending_error.get_or_insert(e);
        }
        self
    }

    /// Called once per accepted connection, before its first read.
    pub fn on_connected<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Arc<Connection>) + Send + Sync + 'static,
    {
        self.on_connected = Some(Arc::new(callback));
        self
    }

    /// Called once per connection after its read task ends.
    pub fn on_disconnected<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Arc<Connection>) + Send + Sync + 'static,
    {
        self.on_disconnected = Some(Arc::new(callback));
        self
    }

    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.config.bind_address = addr;
        self
    }

    /// Accept backlog.
    ///
    /// Default: 128
    pub fn backlog(mut self, backlog: u32) -> Self {
        self.config.backlog = backlog;
        self
    }

    /// Number of send workers.
    ///
    /// Default: 2
    pub fn worker_threads(mut self, workers: usize) -> Self {
        self.config.worker_threads = workers;
        self
    }

    /// Longest a send worker sleeps without a signal.
    ///
    /// Default: 50 ms
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.config.flush_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Longest a flush may wait on a peer before the peer is dropped.
    ///
    /// Default: 30 s
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.config.write_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn max_packet_length(mut self, len: usize) -> Self {
        self.config.max_packet_length = len;
        self
    }

    pub fn legacy_ping(mut self, legacy: LegacyPingConfig) -> Self {
        self.config.legacy_ping = legacy;
        self
    }

    /// Check everything and start the send workers.
    ///
    /// Must be called from inside a tokio runtime. No socket is opened here.
    pub fn build(self) -> Result<Server> {
        if let Some(e) = self.pending_error {
            return Err(e);
        }
        self.config.validate()?;

        let registry = Arc::new(self.protocol.build()?);
        self.handlers.validate(&registry)?;
        if let Some(id) = self
            .handlers
            .ids()
            .find(|id| id.direction() != Side::Server.inbound())
        {
            return Err(ProtocolError::Config(format!(
                "handler registered for {id}, which the server never receives"
            )));
        }

        tokio::runtime::Handle::try_current().map_err(|_| {
            ProtocolError::Config("server must be built inside a tokio runtime".into())
        })?;

        let buffers = Arc::new(BufferManager::new(self.config.buffers.clone())?);
        let orchestrator = SendOrchestrator::start(
            registry.clone(),
            buffers.clone(),
            WriterConfig {
                workers: self.config.worker_threads,
                poll_interval: self.config.flush_interval(),
                write_timeout: self.config.write_timeout(),
            },
        );
        let (shutdown, _) = watch::channel(false);

        info!(
            packets = registry.len(),
            handlers = self.handlers.len(),
            workers = self.config.worker_threads,
            "server built"
        );

        Ok(Server {
            inner: Arc::new(ServerInner {
                config: self.config,
                registry,
                handlers: Arc::new(self.handlers),
                buffers,
                orchestrator,
                connections: Mutex::new(HashMap::new()),
                online: Arc::new(AtomicUsize::new(0)),
                next_id: AtomicU64::new(1),
                on_connected: self.on_connected,
                on_disconnected: self.on_disconnected,
                shutdown,
            }),
        })
    }
}

struct ServerInner {
    config: ServerConfig,
    registry: Arc<ProtocolRegistry>,
    handlers: Arc<HandlerRegistry>,
    buffers: Arc<BufferManager>,
    orchestrator: SendOrchestrator,
    connections: Mutex<HashMap<u64, Arc<Connection>>>,
    online: Arc<AtomicUsize>,
    next_id: AtomicU64,
    on_connected: Option<ConnectionCallback>,
    on_disconnected: Option<ConnectionCallback>,
    shutdown: watch::Sender<bool>,
}

/// A running server. Cheap to clone.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    pub fn builder(config: ServerConfig) -> ServerBuilder {
        ServerBuilder::new(config)
    }

    /// Bind the configured address.
    pub fn bind(&self) -> Result<TcpListener> {
        transport::bind(self.inner.config.bind_address, self.inner.config.backlog)
    }

    /// Bind and serve until [`shutdown`](Self::shutdown).
    pub async fn listen(&self) -> Result<()> {
        let listener = self.bind()?;
        self.serve(listener).await
    }

    /// Accept connections from `listener` until [`shutdown`](Self::shutdown).
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let mut shutdown = self.inner.shutdown.subscribe();
        if *shutdown.borrow() {
            return Ok(());
        }
        info!(addr = %listener.local_addr()?, "accepting connections");

        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = shutdown.changed() => break,
            };
            match accepted {
                Ok((stream, peer)) => {
                    if let Err(e) = transport::configure_stream(&stream) {
                        warn!(peer = %peer, error = %e, "socket options not applied");
                    }
                    let (reader, writer) = stream.into_split();
                    self.serve_connection(reader, writer, Some(peer));
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
        debug!("accept loop stopped");
        Ok(())
    }

    /// Run the protocol over an already connected transport.
    ///
    /// Used by the accept loop; also handy for in-memory transports in tests.
    pub fn serve_connection<R, W>(
        &self,
        reader: R,
        writer: W,
        peer: Option<SocketAddr>,
    ) -> Arc<Connection>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let inner = &self.inner;
        let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        let conn = Connection::new(
            id,
            peer,
            Side::Server,
            ProtocolState::Handshaking,
            writer,
            inner.registry.clone(),
            inner.buffers.clone(),
            inner.orchestrator.outbox_for(id),
        );

        inner.connections.lock().insert(id, conn.clone());
        inner.online.fetch_add(1, Ordering::Relaxed);
        debug!(conn = id, peer = ?peer, "connection accepted");
        if let Some(callback) = &inner.on_connected {
            callback(&conn);
        }

        tokio::spawn(read_loop(self.inner.clone(), conn.clone(), reader));
        conn
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.lock().len()
    }

    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.inner.connections.lock().values().cloned().collect()
    }

    pub fn connection(&self, id: u64) -> Option<Arc<Connection>> {
        self.inner.connections.lock().get(&id).cloned()
    }

    pub fn registry(&self) -> &Arc<ProtocolRegistry> {
        &self.inner.registry
    }

    pub fn buffers(&self) -> &Arc<BufferManager> {
        &self.inner.buffers
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.inner.buffers.stats()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Stop accepting, flush and close every connection, stop the workers.
    pub async fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);

        let connections = self.connections();
        for conn in &connections {
            conn.close();
        }
        self.inner.orchestrator.shutdown().await;
        for conn in &connections {
            if conn.state() != ProtocolState::Disconnected {
                conn.teardown().await;
            }
        }
        info!(closed = connections.len(), "server stopped");
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("bind_address", &self.inner.config.bind_address)
            .field("connections", &self.connection_count())
            .finish()
    }
}

/// Per-connection read task.
async fn read_loop<R>(inner: Arc<ServerInner>, conn: Arc<Connection>, mut reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut pipeline = InboundPipeline::new(
        PooledStream::new(inner.buffers.clone()),
        inner.config.max_packet_length,
        Some(LegacyResponder {
            config: inner.config.legacy_ping.clone(),
            online: inner.online.clone(),
        }),
        inner.registry.clone(),
        inner.handlers.clone(),
    );
    let mut shutdown = inner.shutdown.subscribe();
    let mut block = inner.buffers.get_block();

    loop {
        let read = tokio::select! {
            read = reader.read(&mut block[..]) => read,
            _ = conn.closed() => break,
            _ = shutdown.changed() => break,
        };
        match read {
            Ok(0) => {
                debug!(conn = conn.id(), "peer closed");
                break;
            }
            Ok(n) => {
                if pipeline.on_received(&conn, &block[..n]) == Flow::Stop {
                    break;
                }
            }
            Err(e) => {
                if !conn.state().is_terminal() {
                    error!(conn = conn.id(), error = %e, "read failed");
                }
                break;
            }
        }
    }

    inner.buffers.return_block(block);
    drop(pipeline);

    // A closing connection is torn down by its send worker after the flush.
    if conn.state() != ProtocolState::Closing {
        conn.teardown().await;
    }

    inner.connections.lock().remove(&conn.id());
    inner.online.fetch_sub(1, Ordering::Relaxed);
    debug!(conn = conn.id(), stats = ?conn.stats(), "connection ended");
    if let Some(callback) = &inner.on_disconnected {
        callback(&conn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::VarInt;
    use crate::config::Compression;
    use crate::packets::{KeepAliveClientbound, KeepAliveServerbound};
    use crate::registry::PacketId;

    crate::packet! {
        #[derive(Debug)]
        struct Shadow => PacketId::KeepAliveServerbound {
            id: i32 as VarInt,
        }
    }

    #[tokio::test]
    async fn test_build_defaults() {
        let server = Server::builder(ServerConfig::default()).build().unwrap();
        assert_eq!(server.connection_count(), 0);
        assert_eq!(server.registry().len(), PacketId::ALL.len());
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_duplicate_handler_fails_build() {
        let err = Server::builder(ServerConfig::default())
            .handle(|_conn, _: KeepAliveServerbound| Ok(()))
            .handle(|_conn, _: KeepAliveServerbound| Ok(()))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::DuplicateHandler(PacketId::KeepAliveServerbound)
        ));
    }

    #[tokio::test]
    async fn test_duplicate_raw_id_fails_build() {
        let err = Server::builder(ServerConfig::default())
            .register::<Shadow>()
            .build()
            .unwrap_err();
        assert!(matches!(err, ProtocolError::DuplicateRawId { .. }));
    }

    #[tokio::test]
    async fn test_clientbound_handler_fails_build() {
        let err = Server::builder(ServerConfig::default())
            .handle(|_conn, _: KeepAliveClientbound| Ok(()))
            .build()
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Config(_)));
    }

    #[tokio::test]
    async fn test_compression_fails_build() {
        let config = ServerConfig {
            compression: Compression::Threshold(256),
            ..ServerConfig::default()
        };
        let err = Server::builder(config).build().unwrap_err();
        assert!(matches!(err, ProtocolError::CompressionUnsupported));
    }

    #[test]
    fn test_build_outside_runtime_fails() {
        let err = Server::builder(ServerConfig::default())
            .build()
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Config(_)));
    }

    #[tokio::test]
    async fn test_builder_overrides() {
        let server = Server::builder(ServerConfig::default())
            .bind("127.0.0.1:0".parse().unwrap())
            .backlog(8)
            .worker_threads(3)
            .flush_interval(Duration::from_millis(10))
            .write_timeout(Duration::from_secs(2))
            .max_packet_length(1024)
            .build()
            .unwrap();
        let config = server.config();
        assert_eq!(config.write_timeout_ms, 2000);
        assert_eq!(config.backlog, 8);
        assert_eq!(config.worker_threads, 3);
        assert_eq!(config.flush_interval_ms, 10);
        assert_eq!(config.max_packet_length, 1024);
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_lifecycle_callbacks() {
        let connected = Arc::new(AtomicUsize::new(0));
        let disconnected = Arc::new(AtomicUsize::new(0));
        let (c, d) = (connected.clone(), disconnected.clone());
        let (notify_tx, mut notify_rx) = tokio::sync::mpsc::unbounded_channel();

        let server = Server::builder(ServerConfig::default())
            .on_connected(move |_conn| {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .on_disconnected(move |conn| {
                d.fetch_add(1, Ordering::SeqCst);
                let _ = notify_tx.send(conn.id());
            })
            .build()
            .unwrap();

        let (client, server_io) = tokio::io::duplex(1024);
        let (reader, writer) = tokio::io::split(server_io);
        let conn = server.serve_connection(reader, writer, None);
        assert_eq!(connected.load(Ordering::SeqCst), 1);
        assert_eq!(server.connection_count(), 1);
        assert!(server.connection(conn.id()).is_some());

        drop(client);
        assert_eq!(notify_rx.recv().await, Some(conn.id()));
        assert_eq!(disconnected.load(Ordering::SeqCst), 1);
        assert_eq!(server.connection_count(), 0);
        assert_eq!(conn.state(), ProtocolState::Disconnected);

        server.shutdown().await;
    }
}
