//! Send orchestration: outbound queues and the worker pool that drains them.
//!
//! # Architecture
//!
//! ```text
//! Connection::send ─┐
//! Connection::kick ─┼─► Outbox (shard = conn id % workers) ─► Worker ─► Connection::flush
//! Server code      ─┘        crossbeam queue + Notify
//! ```
//!
//! Enqueueing never blocks. A worker wakes on its `Notify` or after the poll
//! interval and encodes every queued packet into its connection's send
//! stream. Writing to the socket happens on a flush task per connection, so a
//! peer that stops reading only ever stalls itself. At most one flush task
//! runs per connection; a flush that outlives the write timeout drops the
//! peer.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use crate::codec::{OutboundPayload, WireWrite};
use crate::connection::Connection;
use crate::error::{ProtocolError, Result};
use crate::pool::{BufferManager, PooledStream};
use crate::protocol::ProtocolState;
use crate::registry::ProtocolRegistry;

/// A queued outbound packet.
pub struct PacketHolder {
    pub conn: Arc<Connection>,
    pub payload: Box<dyn OutboundPayload>,
    /// State the connection was in when the packet was queued.
    pub state: ProtocolState,
}

/// Work item for a send worker.
pub enum Job {
    /// Encode and append a packet, then flush.
    Packet(PacketHolder),
    /// Flush whatever is in the send stream.
    Flush(Arc<Connection>),
    /// Flush, then tear down. Queued after everything the connection sent.
    Close(Arc<Connection>),
}

impl Job {
    fn connection(&self) -> &Arc<Connection> {
        match self {
            Job::Packet(holder) => &holder.conn,
            Job::Flush(conn) | Job::Close(conn) => conn,
        }
    }
}

/// Producer end of one worker's queue.
#[derive(Clone)]
pub struct Outbox {
    tx: Sender<Job>,
    notify: Arc<Notify>,
}

impl Outbox {
    /// Queue a job and wake the worker.
    pub(crate) fn push(&self, job: Job) -> Result<()> {
        self.tx
            .send(job)
            .map_err(|_| ProtocolError::ConnectionClosed)?;
        self.notify.notify_one();
        Ok(())
    }

    /// An outbox with no worker behind it; jobs stay in the returned receiver.
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, Receiver<Job>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (
            Self {
                tx,
                notify: Arc::new(Notify::new()),
            },
            rx,
        )
    }
}

/// Send worker settings.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Number of worker tasks.
    pub workers: usize,
    /// Longest a worker sleeps without a signal.
    pub poll_interval: Duration,
    /// Longest one flush may wait on the peer.
    pub write_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            poll_interval: Duration::from_millis(50),
            write_timeout: Duration::from_secs(30),
        }
    }
}

/// Fixed pool of send workers.
pub struct SendOrchestrator {
    outboxes: Vec<Outbox>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

impl SendOrchestrator {
    /// Spawn the worker tasks on the current tokio runtime.
    pub fn start(
        registry: Arc<ProtocolRegistry>,
        buffers: Arc<BufferManager>,
        config: WriterConfig,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let workers = config.workers.max(1);
        let mut outboxes = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for index in 0..workers {
            let (tx, rx) = crossbeam_channel::unbounded();
            let notify = Arc::new(Notify::new());
            outboxes.push(Outbox {
                tx,
                notify: notify.clone(),
            });

            let worker = Worker {
                index,
                jobs: rx,
                notify,
                registry: registry.clone(),
                scratch: PooledStream::new(buffers.clone()),
                poll_interval: config.poll_interval,
                write_timeout: config.write_timeout,
                flushes: Vec::new(),
                shutdown: shutdown_rx.clone(),
            };
            handles.push(tokio::spawn(worker.run()));
        }

        debug!(workers = handles.len(), "send workers started");
        Self {
            outboxes,
            workers: Mutex::new(handles),
            shutdown,
        }
    }

    /// Queue of the worker that serves connection `conn_id`.
    pub fn outbox_for(&self, conn_id: u64) -> Outbox {
        let shard = (conn_id % self.outboxes.len() as u64) as usize;
        self.outboxes[shard].clone()
    }

    /// Queue `payload` for `conn`. Same as [`Connection::send_boxed`].
    pub fn enqueue(
        &self,
        conn: &Arc<Connection>,
        payload: Box<dyn OutboundPayload>,
    ) -> Result<()> {
        conn.send_boxed(payload)
    }

    pub fn worker_count(&self) -> usize {
        self.outboxes.len()
    }

    /// Drain every queue one last time, wait for running flushes and stop
    /// the workers.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let handles: Vec<_> = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "send worker panicked");
            }
        }
        debug!("send workers stopped");
    }
}

struct Worker {
    index: usize,
    jobs: Receiver<Job>,
    notify: Arc<Notify>,
    registry: Arc<ProtocolRegistry>,
    scratch: PooledStream,
    poll_interval: Duration,
    write_timeout: Duration,
    flushes: Vec<JoinHandle<()>>,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        self.drain();
                        break;
                    }
                }
            }
            self.drain();
        }

        for flush in self.flushes.drain(..) {
            if let Err(e) = flush.await {
                error!(worker = self.index, error = %e, "flush task panicked");
            }
        }
        trace!(worker = self.index, "send worker exiting");
    }

    /// One pass: encode everything queued, then hand each touched connection
    /// to a flush task unless one is already running for it.
    fn drain(&mut self) {
        let mut touched: Vec<Arc<Connection>> = Vec::new();

        while let Ok(job) = self.jobs.try_recv() {
            let conn = job.connection().clone();
            match &job {
                Job::Packet(holder) => self.encode(holder),
                Job::Close(conn) => conn.mark_close_ready(),
                Job::Flush(_) => {}
            }
            if !touched.iter().any(|c| Arc::ptr_eq(c, &conn)) {
                touched.push(conn);
            }
        }

        self.flushes.retain(|flush| !flush.is_finished());
        for conn in touched {
            if conn.state() == ProtocolState::Disconnected {
                continue;
            }
            if conn.try_begin_flush() {
                let write_timeout = self.write_timeout;
                self.flushes
                    .push(tokio::spawn(flush_connection(conn, write_timeout)));
            }
        }
    }

    fn encode(&mut self, holder: &PacketHolder) {
        let conn = &holder.conn;
        if conn.state() == ProtocolState::Disconnected {
            trace!(
                conn = conn.id(),
                packet = holder.payload.packet_name(),
                "dropped, connection gone"
            );
            return;
        }

        let Some(def) = self.registry.outbound(
            holder.state,
            conn.side().outbound(),
            holder.payload.payload_type(),
        ) else {
            warn!(
                conn = conn.id(),
                packet = holder.payload.packet_name(),
                state = %holder.state,
                "packet not registered for state, dropped"
            );
            return;
        };

        self.scratch.clear();
        self.scratch.put_var_i32(def.raw_id);
        if let Err(e) = holder.payload.encode_into(&mut self.scratch) {
            error!(conn = conn.id(), packet = def.type_name, error = %e, "encode failed");
            return;
        }
        if let Err(e) = conn.append_frame(&self.scratch) {
            error!(conn = conn.id(), packet = def.type_name, error = %e, "append failed");
        }
    }
}

/// Write out a connection's send stream until it stays empty.
///
/// Runs while holding the connection's flush claim. Bytes appended while a
/// write was in progress are picked up by the next round, and a connection
/// whose close job was reached is torn down once nothing is left.
async fn flush_connection(conn: Arc<Connection>, write_timeout: Duration) {
    loop {
        match tokio::time::timeout(write_timeout, conn.flush()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                warn!(conn = conn.id(), error = %e, "flush failed");
                conn.teardown().await;
                conn.end_flush();
                return;
            }
            Err(_) => {
                warn!(
                    conn = conn.id(),
                    timeout_ms = write_timeout.as_millis() as u64,
                    "peer stopped reading"
                );
                conn.teardown().await;
                conn.end_flush();
                return;
            }
        }

        conn.end_flush();
        if conn.state() == ProtocolState::Disconnected {
            return;
        }
        if conn.pending_bytes() > 0 {
            if conn.try_begin_flush() {
                continue;
            }
            return;
        }
        if conn.is_close_ready() && conn.try_begin_flush() {
            conn.teardown().await;
            conn.end_flush();
        }
        return;
    }
}
