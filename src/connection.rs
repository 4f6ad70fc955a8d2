//! One peer connection: protocol state, send stream and transport writer.
//!
//! The read side (receive stream, declared frame length) lives in the
//! connection's [`InboundPipeline`](crate::pipeline::InboundPipeline), owned by
//! its read task. Everything here is shared between that task, handlers and
//! the send workers.

use std::fmt;
use std::io::IoSlice;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

use crate::codec::{OutboundPayload, Packet};
use crate::error::{ProtocolError, Result};
use crate::pool::{BufferManager, PooledStream};
use crate::protocol::{write_frame, ProtocolState, Side};
use crate::registry::ProtocolRegistry;
use crate::writer::{Job, Outbox, PacketHolder};

/// Boxed transport write half.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Byte and packet counters of one connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
}

/// Shared handle to one connection.
pub struct Connection {
    id: u64,
    peer: Option<SocketAddr>,
    side: Side,
    state: AtomicU8,
    send_stream: Mutex<PooledStream>,
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    registry: Arc<ProtocolRegistry>,
    buffers: Arc<BufferManager>,
    outbox: Outbox,
    close_signal: Notify,
    /// A flush task owns the writer.
    flushing: AtomicBool,
    /// The close job went through the send worker; nothing more will be queued.
    close_ready: AtomicBool,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    packets_sent: AtomicU64,
    packets_received: AtomicU64,
}

impl Connection {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new<W>(
        id: u64,
        peer: Option<SocketAddr>,
        side: Side,
        state: ProtocolState,
        writer: W,
        registry: Arc<ProtocolRegistry>,
        buffers: Arc<BufferManager>,
        outbox: Outbox,
    ) -> Arc<Self>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Arc::new(Self {
            id,
            peer,
            side,
            state: AtomicU8::new(state as u8),
            send_stream: Mutex::new(PooledStream::new(buffers.clone())),
            writer: tokio::sync::Mutex::new(Some(Box::new(writer))),
            registry,
            buffers,
            outbox,
            close_signal: Notify::new(),
            flushing: AtomicBool::new(false),
            close_ready: AtomicBool::new(false),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            packets_sent: AtomicU64::new(0),
            packets_received: AtomicU64::new(0),
        })
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn registry(&self) -> &Arc<ProtocolRegistry> {
        &self.registry
    }

    pub fn buffers(&self) -> &Arc<BufferManager> {
        &self.buffers
    }

    /// Current protocol state.
    #[inline]
    pub fn state(&self) -> ProtocolState {
        ProtocolState::from_u8(self.state.load(Ordering::Acquire))
            .unwrap_or(ProtocolState::Disconnected)
    }

    /// Move to `next`.
    ///
    /// `Closing` may only move on to `Disconnected`, and `Disconnected` is
    /// final. Returns false when the move was refused.
    pub fn set_state(&self, next: ProtocolState) -> bool {
        let result = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                let current = ProtocolState::from_u8(raw)?;
                match current {
                    ProtocolState::Disconnected => None,
                    ProtocolState::Closing if next != ProtocolState::Disconnected => None,
                    _ => Some(next as u8),
                }
            });
        match result {
            Ok(prev) => {
                debug!(
                    conn = self.id,
                    from = ?ProtocolState::from_u8(prev),
                    to = %next,
                    "state change"
                );
                true
            }
            Err(_) => false,
        }
    }

    /// Queue `packet` for the send workers. Never blocks.
    ///
    /// The packet is encoded with the table of the state the connection is in
    /// now, even if the state changes before a worker gets to it.
    pub fn send<P: Packet>(self: &Arc<Self>, packet: P) -> Result<()> {
        self.send_boxed(Box::new(packet))
    }

    /// Queue an already boxed payload.
    pub fn send_boxed(self: &Arc<Self>, payload: Box<dyn OutboundPayload>) -> Result<()> {
        let state = self.state();
        if state.is_terminal() {
            return Err(ProtocolError::ConnectionClosed);
        }
        if self
            .registry
            .outbound(state, self.side.outbound(), payload.payload_type())
            .is_none()
        {
            return Err(ProtocolError::UnregisteredPacket {
                packet: payload.packet_name(),
                state,
            });
        }
        self.enqueue(payload, state)
    }

    fn enqueue(
        self: &Arc<Self>,
        payload: Box<dyn OutboundPayload>,
        state: ProtocolState,
    ) -> Result<()> {
        self.outbox.push(Job::Packet(PacketHolder {
            conn: Arc::clone(self),
            payload,
            state,
        }))
    }

    /// Append bytes to the send stream as they are, outside any frame.
    pub fn send_raw(self: &Arc<Self>, bytes: &[u8]) -> Result<()> {
        if !self.state().can_write() {
            return Err(ProtocolError::ConnectionClosed);
        }
        self.send_stream.lock().write_bytes(bytes);
        self.outbox.push(Job::Flush(Arc::clone(self)))
    }

    /// Append `VarInt(len) || body` to the send stream.
    pub(crate) fn append_frame(&self, body: &PooledStream) -> Result<()> {
        write_frame(&mut self.send_stream.lock(), body)?;
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Bytes waiting in the send stream.
    pub fn pending_bytes(&self) -> usize {
        self.send_stream.lock().len()
    }

    /// Drop the peer with a reason.
    ///
    /// When the state the connection was in has a disconnect packet, the
    /// reason is sent in it first. The connection goes `Closing` right away;
    /// a send worker flushes what is queued and tears it down.
    pub fn kick(self: &Arc<Self>, reason: &str) {
        let Some(prior) = self.begin_close() else {
            return;
        };
        warn!(conn = self.id, peer = ?self.peer, state = %prior, reason, "kicking connection");

        let queued = match self.registry.disconnect_for(prior, self.side.outbound()) {
            Some(factory) => self.enqueue(factory(reason), prior),
            None => Ok(()),
        }
        .and_then(|()| self.outbox.push(Job::Close(Arc::clone(self))));
        if queued.is_err() {
            debug!(conn = self.id, "send workers gone, dropping kick");
        }
    }

    /// Flush what is queued, then disconnect.
    pub fn close(self: &Arc<Self>) {
        let Some(prior) = self.begin_close() else {
            return;
        };
        debug!(conn = self.id, state = %prior, "closing connection");
        if self.outbox.push(Job::Close(Arc::clone(self))).is_err() {
            debug!(conn = self.id, "send workers gone, close without flush");
        }
    }

    /// Swap to `Closing` and wake the read task. Returns the state left, or
    /// `None` if the connection was already closing.
    fn begin_close(&self) -> Option<ProtocolState> {
        let prior = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                match ProtocolState::from_u8(raw) {
                    Some(state) if !state.is_terminal() => Some(ProtocolState::Closing as u8),
                    _ => None,
                }
            })
            .ok()
            .and_then(ProtocolState::from_u8)?;
        self.close_signal.notify_one();
        Some(prior)
    }

    /// Claim the writer for one flush task. False if another one holds it.
    pub(crate) fn try_begin_flush(&self) -> bool {
        !self.flushing.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn end_flush(&self) {
        self.flushing.store(false, Ordering::SeqCst);
    }

    /// Called by the send worker once the close job is reached.
    pub(crate) fn mark_close_ready(&self) {
        self.close_ready.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_close_ready(&self) -> bool {
        self.close_ready.load(Ordering::SeqCst)
    }

    /// Resolves once a close was requested.
    pub(crate) async fn closed(&self) {
        self.close_signal.notified().await
    }

    /// Write the whole send stream to the transport.
    ///
    /// Returns the number of bytes written. Partial writes are retried from
    /// where they stopped; a zero-length write is an error.
    pub async fn flush(&self) -> Result<usize> {
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Ok(0);
        };
        if self.state() == ProtocolState::Disconnected {
            return Ok(0);
        }

        let mut pending = {
            let mut stream = self.send_stream.lock();
            if stream.is_empty() {
                return Ok(0);
            }
            std::mem::replace(&mut *stream, PooledStream::new(self.buffers.clone()))
        };

        let mut total = 0;
        while !pending.is_empty() {
            let written = {
                let slices: Vec<IoSlice<'_>> = pending.chunks().map(IoSlice::new).collect();
                writer.write_vectored(&slices).await?
            };
            if written == 0 {
                return Err(ProtocolError::Io(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "write_vectored returned 0",
                )));
            }
            pending.trim_start(written);
            total += written;
        }
        writer.flush().await?;

        self.bytes_sent.fetch_add(total as u64, Ordering::Relaxed);
        trace!(conn = self.id, bytes = total, "flushed");
        Ok(total)
    }

    /// Mark the connection `Disconnected`, shut the writer down and release
    /// the send stream.
    pub async fn teardown(&self) {
        self.state
            .store(ProtocolState::Disconnected as u8, Ordering::Release);
        self.close_signal.notify_one();

        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                trace!(conn = self.id, error = %e, "writer shutdown failed");
            }
        }
        self.send_stream.lock().clear();
        debug!(conn = self.id, "connection torn down");
    }

    /// Compression is not implemented; always fails.
    pub fn enable_compression(&self, _threshold: u32) -> Result<()> {
        Err(ProtocolError::CompressionUnsupported)
    }

    pub(crate) fn record_received(&self, bytes: usize) {
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_packet_received(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("side", &self.side)
            .field("state", &self.state())
            .finish()
    }
}

/// A connection over a sink with its job queue exposed.
#[cfg(test)]
pub(crate) fn test_connection(
    side: Side,
    state: ProtocolState,
) -> (Arc<Connection>, crossbeam_channel::Receiver<Job>) {
    let registry = crate::packets::register_standard(ProtocolRegistry::builder())
        .build()
        .unwrap();
    let (outbox, jobs) = Outbox::detached();
    let conn = Connection::new(
        1,
        None,
        side,
        state,
        tokio::io::sink(),
        Arc::new(registry),
        Arc::new(BufferManager::default()),
        outbox,
    );
    (conn, jobs)
}
