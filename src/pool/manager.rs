//! Pooled buffer manager.
//!
//! Hands out two kinds of buffers:
//! - fixed-size **blocks**, the unit of growth for [`PooledStream`](super::PooledStream)
//! - **large buffers**, rounded up to a size class, used when a stream needs
//!   one contiguous view
//!
//! # Design
//!
//! Free lists are lock-free queues and the byte counters are atomics, so every
//! connection's read task and every send worker can share one manager behind
//! an `Arc` without a lock on the hot path.
//!
//! Ownership is the contract: a [`PooledBlock`] or [`LargeBuffer`] is either
//! sitting in a free list or owned by exactly one stream. Neither type is
//! `Clone` and returning one consumes it, so a double return cannot compile.
//!
//! Returned buffers that would push the free bytes past the configured ceiling
//! are dropped, which bounds pool growth after a burst.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_queue::SegQueue;

use crate::config::BufferConfig;
use crate::error::{ProtocolError, Result};

/// A fixed-size block lent out by a [`BufferManager`].
#[derive(Debug)]
pub struct PooledBlock {
    data: Box<[u8]>,
}

impl Deref for PooledBlock {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for PooledBlock {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// A size-classed contiguous buffer lent out by a [`BufferManager`].
#[derive(Debug)]
pub struct LargeBuffer {
    data: Box<[u8]>,
}

impl Deref for LargeBuffer {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for LargeBuffer {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// Snapshot of pool usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Bytes of blocks sitting in the free list.
    pub small_free_bytes: usize,
    /// Bytes of blocks currently lent out.
    pub small_in_use_bytes: usize,
    /// Bytes of large buffers sitting in free lists.
    pub large_free_bytes: usize,
    /// Bytes of large buffers currently lent out (pooled or not).
    pub large_in_use_bytes: usize,
}

/// Block and large-buffer pool shared by every stream.
pub struct BufferManager {
    config: BufferConfig,
    small_pool: SegQueue<Box<[u8]>>,
    large_pools: Vec<SegQueue<Box<[u8]>>>,
    small_free_bytes: AtomicUsize,
    small_in_use_bytes: AtomicUsize,
    large_free_bytes: AtomicUsize,
    large_in_use_bytes: AtomicUsize,
}

impl BufferManager {
    /// Create a manager for the given sizes.
    pub fn new(config: BufferConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_valid_config(config))
    }

    fn with_valid_config(config: BufferConfig) -> Self {
        let classes = if config.use_exponential_large_buffer {
            let ratio = config.maximum_buffer_size / config.large_buffer_multiple;
            ratio.trailing_zeros() as usize + 1
        } else {
            config.maximum_buffer_size / config.large_buffer_multiple
        };
        let large_pools = (0..classes).map(|_| SegQueue::new()).collect();

        Self {
            config,
            small_pool: SegQueue::new(),
            large_pools,
            small_free_bytes: AtomicUsize::new(0),
            small_in_use_bytes: AtomicUsize::new(0),
            large_free_bytes: AtomicUsize::new(0),
            large_in_use_bytes: AtomicUsize::new(0),
        }
    }

    /// The configuration this manager was built with.
    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// Size of every block.
    #[inline]
    pub fn block_size(&self) -> usize {
        self.config.block_size
    }

    /// Take a block from the free list, allocating one if it is empty.
    pub fn get_block(&self) -> PooledBlock {
        let size = self.config.block_size;
        let data = match self.small_pool.pop() {
            Some(data) => {
                self.small_free_bytes.fetch_sub(size, Ordering::AcqRel);
                data
            }
            None => vec![0u8; size].into_boxed_slice(),
        };
        self.small_in_use_bytes.fetch_add(size, Ordering::AcqRel);
        PooledBlock { data }
    }

    /// Give a block back.
    pub fn return_block(&self, block: PooledBlock) {
        let size = block.data.len();
        self.small_in_use_bytes.fetch_sub(size, Ordering::AcqRel);

        if size != self.config.block_size {
            tracing::warn!(size, "dropping block of foreign size");
            return;
        }

        let ceiling = self.config.maximum_free_small_pool_bytes;
        if ceiling > 0 && self.small_free_bytes.load(Ordering::Acquire) + size > ceiling {
            return;
        }

        self.small_free_bytes.fetch_add(size, Ordering::AcqRel);
        self.small_pool.push(block.data);
    }

    /// Give several blocks back.
    pub fn return_blocks(&self, blocks: impl IntoIterator<Item = PooledBlock>) {
        for block in blocks {
            self.return_block(block);
        }
    }

    /// Size class a request for `required` bytes rounds up to.
    pub fn large_buffer_size(&self, required: usize) -> usize {
        let multiple = self.config.large_buffer_multiple;
        let units = required.max(1).div_ceil(multiple);
        if self.config.use_exponential_large_buffer {
            units.next_power_of_two() * multiple
        } else {
            units * multiple
        }
    }

    /// Free list index for an exact size class, if it is pooled.
    fn class_index(&self, size: usize) -> Option<usize> {
        let multiple = self.config.large_buffer_multiple;
        if size == 0 || size % multiple != 0 || size > self.config.maximum_buffer_size {
            return None;
        }
        let units = size / multiple;
        if self.config.use_exponential_large_buffer {
            units
                .is_power_of_two()
                .then(|| units.trailing_zeros() as usize)
        } else {
            Some(units - 1)
        }
    }

    fn is_size_class(&self, size: usize) -> bool {
        let multiple = self.config.large_buffer_multiple;
        if size == 0 || size % multiple != 0 {
            return false;
        }
        !self.config.use_exponential_large_buffer || (size / multiple).is_power_of_two()
    }

    /// Take a large buffer of at least `required` bytes.
    ///
    /// Requests above `maximum_buffer_size` get a fresh allocation that is
    /// accounted while in use but never pooled.
    pub fn get_large_buffer(&self, required: usize) -> LargeBuffer {
        let size = self.large_buffer_size(required);
        let pooled = self
            .class_index(size)
            .and_then(|index| self.large_pools[index].pop());

        let data = match pooled {
            Some(data) => {
                self.large_free_bytes.fetch_sub(size, Ordering::AcqRel);
                data
            }
            None => {
                if size > self.config.maximum_buffer_size {
                    tracing::debug!(size, "allocating unpooled large buffer");
                }
                vec![0u8; size].into_boxed_slice()
            }
        };
        self.large_in_use_bytes.fetch_add(size, Ordering::AcqRel);
        LargeBuffer { data }
    }

    /// Give a large buffer back.
    ///
    /// Returns `InvalidBuffer` if its length is not a size class.
    pub fn return_large_buffer(&self, buffer: LargeBuffer) -> Result<()> {
        let size = buffer.data.len();
        if !self.is_size_class(size) {
            return Err(ProtocolError::InvalidBuffer(size));
        }
        self.large_in_use_bytes.fetch_sub(size, Ordering::AcqRel);

        let Some(index) = self.class_index(size) else {
            // Oversized: accounted only.
            return Ok(());
        };

        let ceiling = self.config.maximum_free_large_pool_bytes;
        if ceiling > 0 && self.large_free_bytes.load(Ordering::Acquire) + size > ceiling {
            return Ok(());
        }

        self.large_free_bytes.fetch_add(size, Ordering::AcqRel);
        self.large_pools[index].push(buffer.data);
        Ok(())
    }

    /// Current usage counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            small_free_bytes: self.small_free_bytes.load(Ordering::Acquire),
            small_in_use_bytes: self.small_in_use_bytes.load(Ordering::Acquire),
            large_free_bytes: self.large_free_bytes.load(Ordering::Acquire),
            large_in_use_bytes: self.large_in_use_bytes.load(Ordering::Acquire),
        }
    }
}

impl Default for BufferManager {
    fn default() -> Self {
        Self::with_valid_config(BufferConfig::default())
    }
}

impl std::fmt::Debug for BufferManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferManager")
            .field("block_size", &self.config.block_size)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> BufferConfig {
        BufferConfig {
            block_size: 16,
            large_buffer_multiple: 64,
            maximum_buffer_size: 256,
            maximum_free_small_pool_bytes: 0,
            maximum_free_large_pool_bytes: 0,
            ..BufferConfig::default()
        }
    }

    #[test]
    fn test_block_reuse() {
        let manager = BufferManager::new(small_config()).unwrap();
        let mut block = manager.get_block();
        assert_eq!(block.len(), 16);
        block[0] = 0xAB;
        let ptr = block.as_ptr();
        manager.return_block(block);

        let again = manager.get_block();
        assert_eq!(again.as_ptr(), ptr);
    }

    #[test]
    fn test_block_accounting() {
        let manager = BufferManager::new(small_config()).unwrap();
        let a = manager.get_block();
        let b = manager.get_block();
        assert_eq!(manager.stats().small_in_use_bytes, 32);
        assert_eq!(manager.stats().small_free_bytes, 0);

        manager.return_blocks([a, b]);
        let stats = manager.stats();
        assert_eq!(stats.small_in_use_bytes, 0);
        assert_eq!(stats.small_free_bytes, 32);
    }

    #[test]
    fn test_pool_conservation() {
        let manager = BufferManager::new(small_config()).unwrap();

        // Warm the pool so the baseline is non-trivial.
        let warm: Vec<_> = (0..4).map(|_| manager.get_block()).collect();
        manager.return_blocks(warm);
        let warm_large = manager.get_large_buffer(100);
        manager.return_large_buffer(warm_large).unwrap();
        let before = manager.stats();

        let mut held = Vec::new();
        for round in 0..10 {
            held.push(manager.get_block());
            if round % 3 == 0 {
                manager.return_block(held.remove(0));
            }
        }
        let large: Vec<_> = [10, 64, 65, 200]
            .iter()
            .map(|&n| manager.get_large_buffer(n))
            .collect();
        manager.return_blocks(held);
        for buffer in large {
            manager.return_large_buffer(buffer).unwrap();
        }

        let after = manager.stats();
        assert_eq!(after.small_in_use_bytes, 0);
        assert_eq!(after.large_in_use_bytes, 0);
        assert!(after.small_free_bytes >= before.small_free_bytes);
        assert_eq!(after.small_free_bytes % 16, 0);

        // Drain everything back out: exactly what was freed comes back.
        let free_blocks = after.small_free_bytes / 16;
        let drained: Vec<_> = (0..free_blocks).map(|_| manager.get_block()).collect();
        assert_eq!(manager.stats().small_free_bytes, 0);
        manager.return_blocks(drained);
        assert_eq!(manager.stats(), after);
    }

    #[test]
    fn test_warm_pool_round_trip_is_exact() {
        const BLOCKS: usize = 8;
        const PER_CLASS: usize = 2;
        let manager = BufferManager::new(small_config()).unwrap();
        let classes = [64, 128, 192, 256];

        let warm: Vec<_> = (0..BLOCKS).map(|_| manager.get_block()).collect();
        manager.return_blocks(warm);
        for &size in &classes {
            let warm: Vec<_> = (0..PER_CLASS)
                .map(|_| manager.get_large_buffer(size))
                .collect();
            for buffer in warm {
                manager.return_large_buffer(buffer).unwrap();
            }
        }
        let before = manager.stats();
        assert_eq!(before.small_free_bytes, BLOCKS * 16);
        assert_eq!(before.large_free_bytes, PER_CLASS * (64 + 128 + 192 + 256));

        // Never holds more than the warmed counts, so nothing is allocated.
        let mut held = Vec::new();
        for round in 0..20 {
            if held.len() < BLOCKS {
                held.push(manager.get_block());
            }
            if round % 3 == 0 {
                manager.return_block(held.remove(0));
            }
        }
        let large: Vec<_> = [1, 64, 65, 128, 129, 200, 256, 150]
            .iter()
            .map(|&n| manager.get_large_buffer(n))
            .collect();
        let mid = manager.stats();
        assert_eq!(mid.small_free_bytes + mid.small_in_use_bytes, before.small_free_bytes);
        assert_eq!(mid.large_free_bytes + mid.large_in_use_bytes, before.large_free_bytes);
        manager.return_blocks(held);
        for buffer in large {
            manager.return_large_buffer(buffer).unwrap();
        }

        let after = manager.stats();
        assert_eq!(after.small_free_bytes, before.small_free_bytes);
        assert_eq!(after.small_in_use_bytes, before.small_in_use_bytes);
        assert_eq!(after.large_free_bytes, before.large_free_bytes);
        assert_eq!(after.large_in_use_bytes, before.large_in_use_bytes);
    }

    #[test]
    fn test_linear_size_classes() {
        let manager = BufferManager::new(small_config()).unwrap();
        assert_eq!(manager.large_buffer_size(0), 64);
        assert_eq!(manager.large_buffer_size(1), 64);
        assert_eq!(manager.large_buffer_size(64), 64);
        assert_eq!(manager.large_buffer_size(65), 128);
        assert_eq!(manager.large_buffer_size(190), 192);
    }

    #[test]
    fn test_exponential_size_classes() {
        let manager = BufferManager::new(BufferConfig {
            use_exponential_large_buffer: true,
            ..small_config()
        })
        .unwrap();
        assert_eq!(manager.large_buffer_size(65), 128);
        assert_eq!(manager.large_buffer_size(129), 256);

        let buffer = manager.get_large_buffer(129);
        assert_eq!(buffer.len(), 256);
        manager.return_large_buffer(buffer).unwrap();
        assert_eq!(manager.stats().large_free_bytes, 256);
    }

    #[test]
    fn test_large_buffer_reuse() {
        let manager = BufferManager::new(small_config()).unwrap();
        let buffer = manager.get_large_buffer(100);
        assert_eq!(buffer.len(), 128);
        let ptr = buffer.as_ptr();
        manager.return_large_buffer(buffer).unwrap();

        let again = manager.get_large_buffer(70);
        assert_eq!(again.as_ptr(), ptr);
        manager.return_large_buffer(again).unwrap();
    }

    #[test]
    fn test_oversized_buffers_are_not_pooled() {
        let manager = BufferManager::new(small_config()).unwrap();
        let buffer = manager.get_large_buffer(1000);
        assert_eq!(buffer.len(), 1024);
        assert_eq!(manager.stats().large_in_use_bytes, 1024);

        manager.return_large_buffer(buffer).unwrap();
        let stats = manager.stats();
        assert_eq!(stats.large_in_use_bytes, 0);
        assert_eq!(stats.large_free_bytes, 0);
    }

    #[test]
    fn test_invalid_size_rejected() {
        let manager = BufferManager::new(small_config()).unwrap();
        let bogus = LargeBuffer {
            data: vec![0u8; 100].into_boxed_slice(),
        };
        assert!(matches!(
            manager.return_large_buffer(bogus),
            Err(ProtocolError::InvalidBuffer(100))
        ));
    }

    #[test]
    fn test_free_ceiling_drops_returns() {
        let manager = BufferManager::new(BufferConfig {
            maximum_free_small_pool_bytes: 32,
            ..small_config()
        })
        .unwrap();

        let blocks: Vec<_> = (0..4).map(|_| manager.get_block()).collect();
        manager.return_blocks(blocks);

        let stats = manager.stats();
        assert_eq!(stats.small_free_bytes, 32);
        assert_eq!(stats.small_in_use_bytes, 0);
    }

    #[test]
    fn test_default_manager() {
        let manager = BufferManager::default();
        assert_eq!(manager.block_size(), BufferConfig::default().block_size);
        let buffer = manager.get_large_buffer(1);
        manager.return_large_buffer(buffer).unwrap();
    }
}
