//! Growable byte stream backed by pooled buffers.
//!
//! A [`PooledStream`] starts out as a list of fixed-size blocks and grows one
//! block at a time. Asking for a contiguous view copies the content into a
//! single large buffer and the stream stays in that mode from then on.
//!
//! ```text
//!  block mode:   [ block 0 ][ block 1 ][ block 2 ]      len -> ^
//!  large mode:   [ large buffer ..................... ]
//! ```
//!
//! Everything the stream holds goes back to its [`BufferManager`] on drop.

use std::fmt;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::sync::Arc;

use bytes::Buf;

use super::manager::{BufferManager, LargeBuffer, PooledBlock};

/// Pooled, growable, seekable byte stream.
pub struct PooledStream {
    manager: Arc<BufferManager>,
    blocks: Vec<PooledBlock>,
    large: Option<LargeBuffer>,
    /// Buffers replaced while in use, held until drop unless returned eagerly.
    retired_blocks: Vec<PooledBlock>,
    retired_large: Vec<LargeBuffer>,
    len: usize,
    position: usize,
}

impl PooledStream {
    /// Create an empty stream. No buffer is taken until the first write.
    pub fn new(manager: Arc<BufferManager>) -> Self {
        Self {
            manager,
            blocks: Vec::new(),
            large: None,
            retired_blocks: Vec::new(),
            retired_large: Vec::new(),
            len: 0,
            position: 0,
        }
    }

    /// Manager this stream borrows from.
    pub fn manager(&self) -> &Arc<BufferManager> {
        &self.manager
    }

    /// Number of content bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read/write cursor.
    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn set_position(&mut self, position: usize) {
        self.position = position;
    }

    /// Bytes the stream can hold without taking another buffer.
    pub fn capacity(&self) -> usize {
        match &self.large {
            Some(large) => large.len(),
            None => self.blocks.len() * self.block_size(),
        }
    }

    /// True once the stream has switched to a single large buffer.
    pub fn is_contiguous(&self) -> bool {
        self.large.is_some()
    }

    #[inline]
    fn block_size(&self) -> usize {
        self.manager.block_size()
    }

    fn ensure_capacity(&mut self, required: usize) {
        if let Some(large) = &self.large {
            if large.len() >= required {
                return;
            }
            let mut bigger = self.manager.get_large_buffer(required);
            bigger[..self.len].copy_from_slice(&large[..self.len]);
            if let Some(old) = self.large.replace(bigger) {
                self.retire_large(old);
            }
            return;
        }

        while self.capacity() < required {
            let block = self.manager.get_block();
            self.blocks.push(block);
        }
    }

    fn retire_large(&mut self, buffer: LargeBuffer) {
        if self.manager.config().aggressive_buffer_return {
            self.give_back_large(buffer);
        } else {
            self.retired_large.push(buffer);
        }
    }

    fn give_back_large(&self, buffer: LargeBuffer) {
        if let Err(e) = self.manager.return_large_buffer(buffer) {
            tracing::warn!(error = %e, "large buffer not returned to pool");
        }
    }

    /// Copy `data` in at `offset`, growing as needed. Does not move the cursor.
    fn write_at(&mut self, offset: usize, data: &[u8]) {
        let end = offset + data.len();
        self.ensure_capacity(end);
        if offset > self.len {
            self.zero_range(self.len..offset);
        }

        if let Some(large) = &mut self.large {
            large[offset..end].copy_from_slice(data);
        } else {
            let block_size = self.block_size();
            let mut written = 0;
            while written < data.len() {
                let at = offset + written;
                let (index, within) = (at / block_size, at % block_size);
                let run = (block_size - within).min(data.len() - written);
                self.blocks[index][within..within + run]
                    .copy_from_slice(&data[written..written + run]);
                written += run;
            }
        }

        self.len = self.len.max(end);
    }

    fn zero_range(&mut self, range: Range<usize>) {
        if let Some(large) = &mut self.large {
            large[range].fill(0);
            return;
        }
        let block_size = self.block_size();
        let mut at = range.start;
        while at < range.end {
            let (index, within) = (at / block_size, at % block_size);
            let run = (block_size - within).min(range.end - at);
            self.blocks[index][within..within + run].fill(0);
            at += run;
        }
    }

    /// Copy bytes starting at `offset` into `out` without moving the cursor.
    ///
    /// Returns how many bytes were copied.
    pub fn peek(&self, offset: usize, out: &mut [u8]) -> usize {
        if offset >= self.len {
            return 0;
        }
        let mut cursor = self.cursor(offset..self.len);
        let n = out.len().min(cursor.remaining());
        cursor.copy_to_slice(&mut out[..n]);
        n
    }

    /// Byte at `offset`, if it is within the content.
    pub fn byte_at(&self, offset: usize) -> Option<u8> {
        if offset >= self.len {
            return None;
        }
        match &self.large {
            Some(large) => Some(large[offset]),
            None => {
                let block_size = self.block_size();
                Some(self.blocks[offset / block_size][offset % block_size])
            }
        }
    }

    /// A [`Buf`] over `range` of the content.
    ///
    /// # Panics
    ///
    /// Panics if `range` reaches past the content.
    pub fn cursor(&self, range: Range<usize>) -> StreamCursor<'_> {
        assert!(
            range.start <= range.end && range.end <= self.len,
            "cursor range {range:?} out of bounds for stream of {} bytes",
            self.len
        );
        StreamCursor {
            stream: self,
            pos: range.start,
            end: range.end,
        }
    }

    /// Content as a sequence of slices, in order.
    pub fn chunks(&self) -> impl Iterator<Item = &[u8]> + '_ {
        let len = self.len;
        let block_size = self.block_size();
        let large = self.large.as_deref().map(|buf| &buf[..len]);
        large
            .into_iter()
            .filter(|chunk| !chunk.is_empty())
            .chain(
                self.blocks
                    .iter()
                    .enumerate()
                    .map_while(move |(index, block)| {
                        let start = index * block_size;
                        (start < len).then(|| &block[..(len - start).min(block_size)])
                    }),
            )
    }

    /// Copy the content out.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len);
        for chunk in self.chunks() {
            out.extend_from_slice(chunk);
        }
        out
    }

    /// The whole content as one slice.
    ///
    /// The first call moves the content into a large buffer; the stream keeps
    /// that buffer from then on.
    pub fn get_buffer(&mut self) -> &[u8] {
        if self.large.is_none() {
            let mut large = self.manager.get_large_buffer(self.capacity().max(self.len));
            let mut copied = 0;
            for chunk in self.chunks() {
                large[copied..copied + chunk.len()].copy_from_slice(chunk);
                copied += chunk.len();
            }
            let blocks = std::mem::take(&mut self.blocks);
            if self.manager.config().aggressive_buffer_return {
                self.manager.return_blocks(blocks);
            } else {
                self.retired_blocks.extend(blocks);
            }
            self.large = Some(large);
        }
        match &self.large {
            Some(large) => &large[..self.len],
            None => &[],
        }
    }

    /// Drop the first `count` bytes, shifting the rest to the front.
    ///
    /// Whole leading blocks go straight back to the pool. The cursor moves
    /// back by `count` (saturating at zero).
    pub fn trim_start(&mut self, count: usize) {
        let count = count.min(self.len);
        if count == 0 {
            return;
        }
        let remaining = self.len - count;

        if let Some(large) = &mut self.large {
            large.copy_within(count..self.len, 0);
        } else {
            let block_size = self.block_size();
            let whole = count / block_size;
            if whole > 0 {
                let drained: Vec<_> = self.blocks.drain(..whole).collect();
                self.manager.return_blocks(drained);
            }
            let offset = count % block_size;
            if offset > 0 {
                self.shift_blocks_down(offset, remaining);
            }
        }

        self.len = remaining;
        self.position = self.position.saturating_sub(count);
    }

    /// Move `count` bytes starting at `offset` to the front, across blocks.
    fn shift_blocks_down(&mut self, offset: usize, count: usize) {
        let block_size = self.block_size();
        let mut dst = 0;
        while dst < count {
            let src = dst + offset;
            let (src_block, src_off) = (src / block_size, src % block_size);
            let (dst_block, dst_off) = (dst / block_size, dst % block_size);
            let run = (block_size - src_off)
                .min(block_size - dst_off)
                .min(count - dst);

            if src_block == dst_block {
                self.blocks[src_block].copy_within(src_off..src_off + run, dst_off);
            } else {
                let (head, tail) = self.blocks.split_at_mut(src_block);
                head[dst_block][dst_off..dst_off + run]
                    .copy_from_slice(&tail[0][src_off..src_off + run]);
            }
            dst += run;
        }
    }

    /// Write at the cursor and advance it. Never fails; the stream grows.
    pub fn write_bytes(&mut self, data: &[u8]) {
        self.write_at(self.position, data);
        self.position += data.len();
    }

    /// Forget the content but keep the buffers.
    pub fn clear(&mut self) {
        self.len = 0;
        self.position = 0;
    }

    /// Set the content length. Growing zero-fills the new bytes.
    pub fn set_len(&mut self, len: usize) {
        if len > self.len {
            self.ensure_capacity(len);
            self.zero_range(self.len..len);
        }
        self.len = len;
        self.position = self.position.min(len);
    }
}

impl Write for PooledStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for PooledStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.peek(self.position, buf);
        self.position += n;
        Ok(n)
    }
}

impl Seek for PooledStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => (self.len as u64).checked_add_signed(delta),
            SeekFrom::Current(delta) => (self.position as u64).checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of stream")
        })?;
        self.position = usize::try_from(target)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "seek out of range"))?;
        Ok(target)
    }
}

impl Drop for PooledStream {
    fn drop(&mut self) {
        self.manager.return_blocks(self.blocks.drain(..));
        self.manager.return_blocks(self.retired_blocks.drain(..));
        for buffer in self.large.take().into_iter().chain(self.retired_large.drain(..)) {
            if let Err(e) = self.manager.return_large_buffer(buffer) {
                tracing::warn!(error = %e, "large buffer not returned to pool");
            }
        }
    }
}

impl fmt::Debug for PooledStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledStream")
            .field("len", &self.len)
            .field("position", &self.position)
            .field("blocks", &self.blocks.len())
            .field("contiguous", &self.large.is_some())
            .finish()
    }
}

/// Read-only [`Buf`] over a range of a [`PooledStream`].
pub struct StreamCursor<'a> {
    stream: &'a PooledStream,
    pos: usize,
    end: usize,
}

impl StreamCursor<'_> {
    /// Absolute offset of the next byte in the stream.
    pub fn offset(&self) -> usize {
        self.pos
    }
}

impl Buf for StreamCursor<'_> {
    fn remaining(&self) -> usize {
        self.end - self.pos
    }

    fn chunk(&self) -> &[u8] {
        if self.pos >= self.end {
            return &[];
        }
        match &self.stream.large {
            Some(large) => &large[self.pos..self.end],
            None => {
                let block_size = self.stream.block_size();
                let (index, within) = (self.pos / block_size, self.pos % block_size);
                let run = (block_size - within).min(self.end - self.pos);
                &self.stream.blocks[index][within..within + run]
            }
        }
    }

    fn advance(&mut self, cnt: usize) {
        assert!(
            cnt <= self.remaining(),
            "cannot advance past end of cursor: {cnt} > {}",
            self.remaining()
        );
        self.pos += cnt;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BufferConfig;
    use proptest::prelude::*;

    fn manager(block_size: usize) -> Arc<BufferManager> {
        Arc::new(
            BufferManager::new(BufferConfig {
                block_size,
                large_buffer_multiple: 64,
                maximum_buffer_size: 1024,
                ..BufferConfig::default()
            })
            .unwrap(),
        )
    }

    #[test]
    fn test_write_spans_blocks() {
        let mut stream = PooledStream::new(manager(8));
        let data: Vec<u8> = (0..20).collect();
        stream.write_all(&data).unwrap();

        assert_eq!(stream.len(), 20);
        assert_eq!(stream.position(), 20);
        assert_eq!(stream.capacity(), 24);
        assert_eq!(stream.to_vec(), data);
        assert_eq!(stream.chunks().count(), 3);
    }

    #[test]
    fn test_read_after_seek() {
        let mut stream = PooledStream::new(manager(4));
        stream.write_all(b"hello world").unwrap();
        stream.seek(SeekFrom::Start(6)).unwrap();

        let mut out = [0u8; 16];
        let n = stream.read(&mut out).unwrap();
        assert_eq!(&out[..n], b"world");
        assert_eq!(stream.read(&mut out).unwrap(), 0);
    }

    #[test]
    fn test_seek_before_start_fails() {
        let mut stream = PooledStream::new(manager(4));
        assert!(stream.seek(SeekFrom::Current(-1)).is_err());
        assert_eq!(stream.seek(SeekFrom::End(0)).unwrap(), 0);
    }

    #[test]
    fn test_overwrite_in_middle() {
        let mut stream = PooledStream::new(manager(4));
        stream.write_all(b"abcdefgh").unwrap();
        stream.set_position(3);
        stream.write_all(b"XY").unwrap();
        assert_eq!(stream.to_vec(), b"abcXYfgh");
        assert_eq!(stream.len(), 8);
    }

    #[test]
    fn test_write_past_end_zero_fills() {
        let mut stream = PooledStream::new(manager(4));
        stream.write_all(b"ab").unwrap();
        stream.clear();
        stream.write_all(b"zz").unwrap();
        stream.set_position(6);
        stream.write_all(b"q").unwrap();
        assert_eq!(stream.to_vec(), b"zz\0\0\0\0q");
    }

    #[test]
    fn test_cursor_reads_across_blocks() {
        let mut stream = PooledStream::new(manager(4));
        stream.write_all(&[0, 0, 0x12, 0x34, 0x56, 0x78, 0x9A]).unwrap();

        let mut cursor = stream.cursor(2..6);
        assert_eq!(cursor.remaining(), 4);
        assert_eq!(cursor.chunk(), &[0x12, 0x34]);
        assert_eq!(cursor.get_u32(), 0x1234_5678);
        assert!(!cursor.has_remaining());
        assert_eq!(cursor.offset(), 6);
    }

    #[test]
    #[should_panic]
    fn test_cursor_out_of_bounds_panics() {
        let mut stream = PooledStream::new(manager(4));
        stream.write_all(b"abc").unwrap();
        let _ = stream.cursor(0..4);
    }

    #[test]
    fn test_peek_and_byte_at() {
        let mut stream = PooledStream::new(manager(4));
        stream.write_all(b"0123456789").unwrap();

        let mut out = [0u8; 5];
        assert_eq!(stream.peek(3, &mut out), 5);
        assert_eq!(&out, b"34567");
        assert_eq!(stream.peek(8, &mut out), 2);
        assert_eq!(stream.peek(10, &mut out), 0);
        assert_eq!(stream.byte_at(9), Some(b'9'));
        assert_eq!(stream.byte_at(10), None);
    }

    #[test]
    fn test_get_buffer_switches_mode() {
        let manager = manager(4);
        let mut stream = PooledStream::new(manager.clone());
        stream.write_all(b"abcdefghij").unwrap();
        assert!(!stream.is_contiguous());

        assert_eq!(stream.get_buffer(), b"abcdefghij");
        assert!(stream.is_contiguous());

        stream.write_all(b"klm").unwrap();
        assert_eq!(stream.to_vec(), b"abcdefghijklm");
        assert_eq!(stream.chunks().count(), 1);

        // Blocks are held until drop without aggressive return.
        assert_eq!(manager.stats().small_in_use_bytes, 12);
        drop(stream);
        assert_eq!(manager.stats().small_in_use_bytes, 0);
        assert_eq!(manager.stats().large_in_use_bytes, 0);
    }

    #[test]
    fn test_get_buffer_aggressive_return() {
        let manager = Arc::new(
            BufferManager::new(BufferConfig {
                block_size: 4,
                large_buffer_multiple: 64,
                maximum_buffer_size: 1024,
                aggressive_buffer_return: true,
                ..BufferConfig::default()
            })
            .unwrap(),
        );
        let mut stream = PooledStream::new(manager.clone());
        stream.write_all(b"abcdefgh").unwrap();
        let _ = stream.get_buffer();
        assert_eq!(manager.stats().small_in_use_bytes, 0);
    }

    #[test]
    fn test_large_mode_grows() {
        let manager = manager(4);
        let mut stream = PooledStream::new(manager.clone());
        stream.write_all(b"x").unwrap();
        let _ = stream.get_buffer();
        assert_eq!(stream.capacity(), 64);

        stream.write_all(&[7u8; 100]).unwrap();
        assert_eq!(stream.len(), 101);
        assert_eq!(stream.capacity(), 128);
        assert_eq!(stream.byte_at(0), Some(b'x'));
        assert_eq!(stream.byte_at(100), Some(7));
    }

    #[test]
    fn test_trim_start_returns_whole_blocks() {
        let manager = manager(4);
        let mut stream = PooledStream::new(manager.clone());
        stream.write_all(b"abcdefghijkl").unwrap();
        assert_eq!(manager.stats().small_in_use_bytes, 12);

        stream.trim_start(9);
        assert_eq!(stream.to_vec(), b"jkl");
        assert_eq!(stream.position(), 3);
        assert_eq!(manager.stats().small_in_use_bytes, 4);
    }

    #[test]
    fn test_trim_everything() {
        let mut stream = PooledStream::new(manager(4));
        stream.write_all(b"abcdef").unwrap();
        stream.trim_start(100);
        assert!(stream.is_empty());
        assert_eq!(stream.position(), 0);

        stream.write_all(b"xy").unwrap();
        assert_eq!(stream.to_vec(), b"xy");
    }

    #[test]
    fn test_set_len() {
        let mut stream = PooledStream::new(manager(4));
        stream.write_all(b"abcdef").unwrap();
        stream.set_len(2);
        assert_eq!(stream.to_vec(), b"ab");
        assert_eq!(stream.position(), 2);

        stream.set_len(5);
        assert_eq!(stream.to_vec(), b"ab\0\0\0");
    }

    #[test]
    fn test_drop_returns_everything() {
        let manager = manager(4);
        {
            let mut stream = PooledStream::new(manager.clone());
            stream.write_all(&[1u8; 50]).unwrap();
            let _ = stream.get_buffer();
            stream.write_all(&[2u8; 100]).unwrap();
        }
        let stats = manager.stats();
        assert_eq!(stats.small_in_use_bytes, 0);
        assert_eq!(stats.large_in_use_bytes, 0);
    }

    proptest! {
        #[test]
        fn prop_trim_keeps_suffix(
            data in proptest::collection::vec(any::<u8>(), 0..200),
            cut in 0usize..220,
            block_size in 1usize..16,
            contiguous in any::<bool>(),
        ) {
            let mut stream = PooledStream::new(manager(block_size));
            stream.write_all(&data).unwrap();
            if contiguous {
                let _ = stream.get_buffer();
            }
            stream.trim_start(cut);

            let expected = &data[cut.min(data.len())..];
            prop_assert_eq!(stream.len(), expected.len());
            prop_assert_eq!(stream.to_vec(), expected.to_vec());

            let mut cursor = stream.cursor(0..stream.len());
            let mut via_buf = vec![0u8; cursor.remaining()];
            cursor.copy_to_slice(&mut via_buf);
            prop_assert_eq!(via_buf, expected.to_vec());
        }
    }
}
