//! Receive side: frame detection, id resolution, dispatch and trimming.
//!
//! Each read task owns one [`InboundPipeline`]. Bytes are appended to a
//! pooled receive stream; every complete frame at its front is decoded with
//! the table of the connection's current state, handed to exactly one
//! handler, then trimmed off. A partial frame stays until more bytes arrive,
//! with its parsed length prefix cached in between.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, error, trace, warn};

use crate::config::LegacyPingConfig;
use crate::connection::Connection;
use crate::error::{DecodeError, ProtocolError, Result};
use crate::handler::HandlerRegistry;
use crate::pool::PooledStream;
use crate::protocol::legacy::{self, LegacyProbe};
use crate::protocol::varint::read_var_i32;
use crate::protocol::{legacy_reply, peek_prefix, FramePrefix, ProtocolState};
use crate::registry::ProtocolRegistry;

/// Whether the read task should keep reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Answers legacy server list pings.
#[derive(Debug, Clone)]
pub struct LegacyResponder {
    pub config: LegacyPingConfig,
    /// Live count reported as the online player number.
    pub online: Arc<AtomicUsize>,
}

impl LegacyResponder {
    fn reply(&self) -> Vec<u8> {
        legacy_reply(
            &self.config.motd,
            self.online.load(Ordering::Relaxed),
            self.config.max_players,
        )
    }
}

enum Step {
    /// A frame was dispatched; try the next one.
    Frame,
    /// Not enough bytes for a frame.
    Wait,
    /// The connection is done reading.
    Stop,
}

/// Per-connection receive state.
pub struct InboundPipeline {
    stream: PooledStream,
    declared: Option<FramePrefix>,
    legacy_checked: bool,
    max_packet_length: usize,
    legacy: Option<LegacyResponder>,
    registry: Arc<ProtocolRegistry>,
    handlers: Arc<HandlerRegistry>,
}

impl InboundPipeline {
    pub fn new(
        stream: PooledStream,
        max_packet_length: usize,
        legacy: Option<LegacyResponder>,
        registry: Arc<ProtocolRegistry>,
        handlers: Arc<HandlerRegistry>,
    ) -> Self {
        Self {
            stream,
            declared: None,
            legacy_checked: legacy.is_none(),
            max_packet_length,
            legacy,
            registry,
            handlers,
        }
    }

    /// Bytes received but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.stream.len()
    }

    /// Length prefix of the partial frame at the front, once parsed.
    pub fn declared_length(&self) -> Option<usize> {
        self.declared.map(|prefix| prefix.body_len)
    }

    /// Feed newly received bytes and process every complete frame.
    ///
    /// Protocol violations kick the peer and return [`Flow::Stop`].
    pub fn on_received(&mut self, conn: &Arc<Connection>, data: &[u8]) -> Flow {
        if conn.state().is_terminal() {
            return Flow::Stop;
        }
        conn.record_received(data.len());
        let end = self.stream.len();
        self.stream.set_position(end);
        self.stream.write_bytes(data);

        loop {
            match self.step(conn) {
                Ok(Step::Frame) => continue,
                Ok(Step::Wait) => return Flow::Continue,
                Ok(Step::Stop) => return Flow::Stop,
                Err(e) => {
                    self.fail(conn, e);
                    return Flow::Stop;
                }
            }
        }
    }

    fn fail(&mut self, conn: &Arc<Connection>, err: ProtocolError) {
        match &err {
            ProtocolError::Decode(DecodeError::InvalidData(reason)) => {
                warn!(conn = conn.id(), state = %conn.state(), reason = %reason, "invalid data");
            }
            ProtocolError::HandlerNotFound(id) => {
                warn!(conn = conn.id(), packet = %id, "no handler");
            }
            other => {
                error!(conn = conn.id(), error = %other, "handler failed");
            }
        }
        conn.kick(&err.to_string());
        self.stream.clear();
        self.declared = None;
    }

    fn step(&mut self, conn: &Arc<Connection>) -> Result<Step> {
        let state = conn.state();
        if state.is_terminal() {
            return Ok(Step::Stop);
        }

        if !self.legacy_checked && self.declared.is_none() {
            if state != ProtocolState::Handshaking {
                self.legacy_checked = true;
            } else {
                match legacy::detect(&self.stream) {
                    LegacyProbe::Undecided => return Ok(Step::Wait),
                    LegacyProbe::Absent => self.legacy_checked = true,
                    LegacyProbe::Detected => {
                        self.answer_legacy_ping(conn)?;
                        return Ok(Step::Stop);
                    }
                }
            }
        }

        let prefix = match self.declared {
            Some(prefix) => prefix,
            None => match peek_prefix(&self.stream, self.max_packet_length) {
                Ok(prefix) => {
                    self.declared = Some(prefix);
                    prefix
                }
                Err(DecodeError::NeedMoreData) => return Ok(Step::Wait),
                Err(e) => return Err(e.into()),
            },
        };
        if self.stream.len() < prefix.total_len() {
            trace!(
                conn = conn.id(),
                have = self.stream.len(),
                need = prefix.total_len(),
                "partial frame"
            );
            return Ok(Step::Wait);
        }

        let (id, payload) = {
            let mut body = self.stream.cursor(prefix.prefix_len..prefix.total_len());
            let raw_id = read_var_i32(&mut body).map_err(|e| match e {
                DecodeError::NeedMoreData => DecodeError::invalid("frame too short for packet id"),
                other => other,
            })?;
            self.registry
                .decode(state, conn.side().inbound(), raw_id, &mut body)?
        };

        self.stream.trim_start(prefix.total_len());
        self.declared = None;
        conn.record_packet_received();
        trace!(conn = conn.id(), packet = %id, "dispatch");

        self.handlers.dispatch(id, conn, payload)?;
        Ok(Step::Frame)
    }

    fn answer_legacy_ping(&mut self, conn: &Arc<Connection>) -> Result<()> {
        let Some(responder) = &self.legacy else {
            return Ok(());
        };
        debug!(conn = conn.id(), peer = ?conn.peer(), "legacy ping");
        conn.send_raw(&responder.reply())?;
        conn.close();
        self.stream.clear();
        Ok(())
    }
}

impl std::fmt::Debug for InboundPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundPipeline")
            .field("buffered", &self.stream.len())
            .field("declared", &self.declared)
            .field("legacy_checked", &self.legacy_checked)
            .finish()
    }
}
