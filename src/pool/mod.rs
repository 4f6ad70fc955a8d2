//! Pooled buffers: the shared [`BufferManager`] and the [`PooledStream`]
//! built on it.

mod manager;
mod stream;

pub use manager::{BufferManager, LargeBuffer, PoolStats, PooledBlock};
pub use stream::{PooledStream, StreamCursor};
