//! Server and buffer-pool configuration.
//!
//! All structs deserialize from JSON with every field optional:
//!
//! ```
//! use craftwire::config::ServerConfig;
//!
//! let json = r#"{ "bind_address": "127.0.0.1:25570", "worker_threads": 4 }"#;
//! let config = ServerConfig::from_json_str(json).unwrap();
//! assert_eq!(config.worker_threads, 4);
//! assert_eq!(config.backlog, 128);
//! ```

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ProtocolError, Result};

/// Largest frame body a VarInt of three bytes can describe.
pub const DEFAULT_MAX_PACKET_LENGTH: usize = 2_097_151;

/// Default listen address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:25565";

/// Sizing of the pooled buffer manager.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Size of one small block.
    pub block_size: usize,
    /// Unit of large-buffer size classes.
    pub large_buffer_multiple: usize,
    /// Largest large buffer that is pooled.
    pub maximum_buffer_size: usize,
    /// Size classes grow as powers of two instead of linearly.
    pub use_exponential_large_buffer: bool,
    /// Free block bytes kept before returned blocks are dropped (0 = unbounded).
    pub maximum_free_small_pool_bytes: usize,
    /// Free large-buffer bytes kept before returns are dropped (0 = unbounded).
    pub maximum_free_large_pool_bytes: usize,
    /// Hand small blocks back as soon as a stream switches to a large buffer.
    pub aggressive_buffer_return: bool,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            block_size: 4 * 1024,
            large_buffer_multiple: 64 * 1024,
            maximum_buffer_size: 4 * 1024 * 1024,
            use_exponential_large_buffer: false,
            maximum_free_small_pool_bytes: 16 * 1024 * 1024,
            maximum_free_large_pool_bytes: 64 * 1024 * 1024,
            aggressive_buffer_return: false,
        }
    }
}

impl BufferConfig {
    /// Check that size classes are well formed.
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(ProtocolError::Config("block_size must be > 0".into()));
        }
        if self.large_buffer_multiple == 0 {
            return Err(ProtocolError::Config(
                "large_buffer_multiple must be > 0".into(),
            ));
        }
        if self.maximum_buffer_size < self.large_buffer_multiple {
            return Err(ProtocolError::Config(
                "maximum_buffer_size must be at least large_buffer_multiple".into(),
            ));
        }
        if self.use_exponential_large_buffer {
            let ratio = self.maximum_buffer_size / self.large_buffer_multiple;
            if self.maximum_buffer_size % self.large_buffer_multiple != 0
                || !ratio.is_power_of_two()
            {
                return Err(ProtocolError::Config(
                    "maximum_buffer_size must be large_buffer_multiple times a power of two"
                        .into(),
                ));
            }
        } else if self.maximum_buffer_size % self.large_buffer_multiple != 0 {
            return Err(ProtocolError::Config(
                "maximum_buffer_size must be a multiple of large_buffer_multiple".into(),
            ));
        }
        Ok(())
    }
}

/// Text of the reply sent to pre-netty server list pings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LegacyPingConfig {
    /// Message of the day.
    pub motd: String,
    /// Advertised player limit.
    pub max_players: u32,
}

impl Default for LegacyPingConfig {
    fn default() -> Self {
        Self {
            motd: "A craftwire server".to_string(),
            max_players: 20,
        }
    }
}

/// Packet compression mode.
///
/// Only `Disabled` works. `Threshold` is recognized so configuration files
/// that ask for it fail loudly at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    /// Frames are written as-is.
    #[default]
    Disabled,
    /// Compress bodies at or above this many bytes.
    Threshold(u32),
}

/// Top-level server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the listener binds to.
    pub bind_address: SocketAddr,
    /// Accept backlog passed to `listen(2)`.
    pub backlog: u32,
    /// Number of outbound worker tasks.
    pub worker_threads: usize,
    /// Longest a worker waits for a flush signal, in milliseconds.
    pub flush_interval_ms: u64,
    /// Longest one flush may wait on a peer that stopped reading, in
    /// milliseconds. The peer is dropped after that.
    pub write_timeout_ms: u64,
    /// Largest accepted frame body (id + fields).
    pub max_packet_length: usize,
    /// Compression mode; anything but `Disabled` is rejected.
    pub compression: Compression,
    /// Legacy ping reply text.
    pub legacy_ping: LegacyPingConfig,
    /// Buffer pool sizing.
    pub buffers: BufferConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 25565)),
            backlog: 128,
            worker_threads: 2,
            flush_interval_ms: 50,
            write_timeout_ms: 30_000,
            max_packet_length: DEFAULT_MAX_PACKET_LENGTH,
            compression: Compression::Disabled,
            legacy_ping: LegacyPingConfig::default(),
            buffers: BufferConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Parse a configuration from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: ServerConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Worker poll interval.
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Per-flush write deadline.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Reject configurations the engine cannot run.
    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            return Err(ProtocolError::Config("worker_threads must be > 0".into()));
        }
        if self.flush_interval_ms == 0 {
            return Err(ProtocolError::Config("flush_interval_ms must be > 0".into()));
        }
        if self.write_timeout_ms == 0 {
            return Err(ProtocolError::Config("write_timeout_ms must be > 0".into()));
        }
        if self.max_packet_length == 0 || self.max_packet_length > DEFAULT_MAX_PACKET_LENGTH {
            return Err(ProtocolError::Config(format!(
                "max_packet_length must be in 1..={DEFAULT_MAX_PACKET_LENGTH}"
            )));
        }
        if self.compression != Compression::Disabled {
            return Err(ProtocolError::CompressionUnsupported);
        }
        self.buffers.validate()
    }
}
