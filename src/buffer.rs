/*
 * mnio - non-blocking channels, byte buffers and a readiness selector
 * This is free and unencumbered software released into the public domain.
 */
use std::fmt::{Debug, Formatter};

use memmap2::{Mmap, MmapMut};

use crate::error::{NioError, Result};

/// A fixed-capacity byte container with a read/write cursor
///
/// A `ByteBuffer` has a `capacity` that never changes, a `limit` bounding the
/// region that may be read or written, a `position` where the next relative
/// `put` or `get` happens, and an optional `mark`. At all times
/// `0 <= mark <= position <= limit <= capacity` holds; operations that would
/// break this fail with [`NioError`](crate::NioError) and leave the buffer
/// unchanged.
///
/// The usual cycle is: `put` data (write mode), [`flip()`](ByteBuffer::flip)
/// to read mode, `get` data, then [`clear()`](ByteBuffer::clear) or
/// [`compact()`](ByteBuffer::compact) to write again.
///
/// Buffers created by [`allocate()`](ByteBuffer::allocate) live on the heap,
/// while [`allocate_direct()`](ByteBuffer::allocate_direct) buffers are backed
/// by an anonymous memory mapping owned by the process.
pub struct ByteBuffer {
    storage: Storage,
    position: usize,
    limit: usize,
    mark: Option<usize>,
}

enum Storage {
    Heap(Box<[u8]>),
    Direct(MmapMut),
    DirectReadOnly(Mmap),
}

impl Storage {
    fn as_slice(&self) -> &[u8] {
        match self {
            Self::Heap(data) => &data[..],
            Self::Direct(map) => &map[..],
            Self::DirectReadOnly(map) => &map[..],
        }
    }

    fn as_mut_slice(&mut self) -> Result<&mut [u8]> {
        match self {
            Self::Heap(data) => Ok(&mut data[..]),
            Self::Direct(map) => Ok(&mut map[..]),
            Self::DirectReadOnly(_) => Err(NioError::ReadOnlyBuffer),
        }
    }
}

impl ByteBuffer {
    /// Allocates a zero-filled heap buffer.
    pub fn allocate(capacity: usize) -> Self {
        Self::from_storage(Storage::Heap(vec![0u8; capacity].into_boxed_slice()))
    }

    /// Allocates a buffer backed by an anonymous memory mapping.
    pub fn allocate_direct(capacity: usize) -> Result<Self> {
        Ok(Self::from_storage(Storage::Direct(MmapMut::map_anon(capacity)?)))
    }

    /// Wraps existing bytes; the whole content is readable.
    pub fn wrap(data: Vec<u8>) -> Self {
        Self::from_storage(Storage::Heap(data.into_boxed_slice()))
    }

    pub(crate) fn from_mmap(map: MmapMut) -> Self {
        Self::from_storage(Storage::Direct(map))
    }

    pub(crate) fn from_mmap_read_only(map: Mmap) -> Self {
        Self::from_storage(Storage::DirectReadOnly(map))
    }

    fn from_storage(storage: Storage) -> Self {
        let capacity = storage.as_slice().len();
        Self {
            storage,
            position: 0,
            limit: capacity,
            mark: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.storage.as_slice().len()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn mark_position(&self) -> Option<usize> {
        self.mark
    }

    pub fn remaining(&self) -> usize {
        self.limit - self.position
    }

    pub fn has_remaining(&self) -> bool {
        self.position < self.limit
    }

    pub fn is_direct(&self) -> bool {
        !matches!(self.storage, Storage::Heap(_))
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self.storage, Storage::DirectReadOnly(_))
    }

    /// Moves the position; a mark beyond the new position is discarded.
    pub fn set_position(&mut self, position: usize) -> Result<()> {
        if position > self.limit {
            return Err(NioError::BufferState("position exceeds limit"));
        }
        self.position = position;
        if self.mark.map_or(false, |mark| mark > position) {
            self.mark = None;
        }
        Ok(())
    }

    /// Moves the limit; the position and the mark are pulled back if needed.
    pub fn set_limit(&mut self, limit: usize) -> Result<()> {
        if limit > self.capacity() {
            return Err(NioError::BufferState("limit exceeds capacity"));
        }
        self.limit = limit;
        if self.position > limit {
            self.position = limit;
        }
        if self.mark.map_or(false, |mark| mark > limit) {
            self.mark = None;
        }
        Ok(())
    }

    // ~~~~~~~~~~~~~~~~~~~~~~~
    // Relative access
    // ~~~~~~~~~~~~~~~~~~~~~~~

    pub fn put(&mut self, data: &[u8]) -> Result<&mut Self> {
        let remaining = self.remaining();
        if data.len() > remaining {
            return Err(NioError::Overflow { requested: data.len(), remaining });
        }
        let start = self.position;
        self.storage.as_mut_slice()?[start..start + data.len()].copy_from_slice(data);
        self.position += data.len();
        Ok(self)
    }

    pub fn put_u8(&mut self, value: u8) -> Result<&mut Self> {
        self.put(&[value])
    }

    /// Returns the next `count` bytes and advances the position past them.
    pub fn get(&mut self, count: usize) -> Result<&[u8]> {
        let remaining = self.remaining();
        if count > remaining {
            return Err(NioError::Underflow { requested: count, remaining });
        }
        let start = self.position;
        self.position += count;
        Ok(&self.storage.as_slice()[start..start + count])
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        Ok(self.get(1)?[0])
    }

    /// Fills `dst` completely from the buffer.
    pub fn get_into(&mut self, dst: &mut [u8]) -> Result<&mut Self> {
        let source = self.get(dst.len())?;
        dst.copy_from_slice(source);
        Ok(self)
    }

    // ~~~~~~~~~~~~~~~~~~~~~~~
    // Cursor operations
    // ~~~~~~~~~~~~~~~~~~~~~~~

    /// Switches from write mode to read mode.
    pub fn flip(&mut self) -> &mut Self {
        self.limit = self.position;
        self.position = 0;
        self.mark = None;
        self
    }

    /// Prepares for a fresh write pass. The content is **not** erased.
    pub fn clear(&mut self) -> &mut Self {
        self.position = 0;
        self.limit = self.capacity();
        self.mark = None;
        self
    }

    /// Prepares to re-read the readable region.
    pub fn rewind(&mut self) -> &mut Self {
        self.position = 0;
        self.mark = None;
        self
    }

    pub fn mark(&mut self) -> &mut Self {
        self.mark = Some(self.position);
        self
    }

    pub fn reset(&mut self) -> Result<&mut Self> {
        match self.mark {
            Some(mark) => {
                self.position = mark;
                Ok(self)
            }
            None => Err(NioError::MarkNotSet),
        }
    }

    /// Moves the unread bytes `[position, limit)` to the front and switches
    /// back to write mode right behind them.
    pub fn compact(&mut self) -> Result<&mut Self> {
        let (start, end) = (self.position, self.limit);
        if start > 0 {
            self.storage.as_mut_slice()?.copy_within(start..end, 0);
        }
        self.position = end - start;
        self.limit = self.capacity();
        self.mark = None;
        Ok(self)
    }

    // ~~~~~~~~~~~~~~~~~~~~~~~
    // Channel access
    // ~~~~~~~~~~~~~~~~~~~~~~~

    /// The region between position and limit, i.e. what `get` would return.
    pub fn readable(&self) -> &[u8] {
        &self.storage.as_slice()[self.position..self.limit]
    }

    /// The region between position and limit, for filling in place.
    pub fn writable(&mut self) -> Result<&mut [u8]> {
        let (start, end) = (self.position, self.limit);
        Ok(&mut self.storage.as_mut_slice()?[start..end])
    }

    /// Advances the position by `count` after in-place access.
    pub fn advance(&mut self, count: usize) -> Result<()> {
        match self.position.checked_add(count) {
            Some(position) if position <= self.limit => {
                self.position = position;
                Ok(())
            }
            _ => Err(NioError::BufferState("advance past limit")),
        }
    }

    /// Flushes a writable mapping back to its file. No-op for other storage.
    pub fn force(&self) -> Result<()> {
        if let Storage::Direct(map) = &self.storage {
            map.flush()?;
        }
        Ok(())
    }
}

impl Default for ByteBuffer {
    fn default() -> Self {
        Self::allocate(0)
    }
}

impl From<&[u8]> for ByteBuffer {
    fn from(data: &[u8]) -> Self {
        Self::wrap(data.to_vec())
    }
}

impl Debug for ByteBuffer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteBuffer")
            .field("position", &self.position)
            .field("limit", &self.limit)
            .field("capacity", &self.capacity())
            .field("mark", &self.mark)
            .field("direct", &self.is_direct())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_buffer_is_in_write_mode() {
        let buffer = ByteBuffer::allocate(10);
        assert_eq!(buffer.capacity(), 10);
        assert_eq!(buffer.limit(), 10);
        assert_eq!(buffer.position(), 0);
        assert_eq!(buffer.mark_position(), None);
        assert!(!buffer.is_direct());
    }

    #[test]
    fn put_past_limit_overflows() {
        let mut buffer = ByteBuffer::allocate(4);
        buffer.put(b"abc").unwrap();
        match buffer.put(b"de") {
            Err(NioError::Overflow { requested: 2, remaining: 1 }) => (),
            other => panic!("unexpected: {:?}", other.map(|b| b.position())),
        }
        assert_eq!(buffer.position(), 3);
    }

    #[test]
    fn get_past_limit_underflows() {
        let mut buffer = ByteBuffer::allocate(4);
        buffer.put(b"ab").unwrap();
        buffer.flip();
        assert!(matches!(buffer.get(3), Err(NioError::Underflow { requested: 3, remaining: 2 })));
        assert_eq!(buffer.position(), 0);
    }

    #[test]
    fn clear_keeps_content() {
        let mut buffer = ByteBuffer::allocate(4);
        buffer.put(b"xy").unwrap();
        buffer.flip();
        buffer.clear();
        assert_eq!(buffer.limit(), 4);
        assert_eq!(buffer.get_u8().unwrap(), b'x');
    }

    #[test]
    fn compact_keeps_unread_tail() {
        let mut buffer = ByteBuffer::allocate(8);
        buffer.put(b"hello").unwrap();
        buffer.flip();
        assert_eq!(buffer.get(2).unwrap(), b"he");
        buffer.compact().unwrap();
        assert_eq!(buffer.position(), 3);
        assert_eq!(buffer.limit(), 8);
        buffer.put(b"!").unwrap();
        buffer.flip();
        assert_eq!(buffer.readable(), b"llo!");
    }

    #[test]
    fn set_position_discards_mark_beyond_it() {
        let mut buffer = ByteBuffer::allocate(8);
        buffer.set_position(5).unwrap();
        buffer.mark();
        buffer.set_position(2).unwrap();
        assert_eq!(buffer.mark_position(), None);
        assert!(matches!(buffer.set_position(9), Err(NioError::BufferState(_))));
    }

    #[test]
    fn set_limit_pulls_position_back() {
        let mut buffer = ByteBuffer::allocate(8);
        buffer.set_position(6).unwrap();
        buffer.set_limit(4).unwrap();
        assert_eq!(buffer.position(), 4);
        assert!(matches!(buffer.set_limit(9), Err(NioError::BufferState(_))));
    }

    #[test]
    fn in_place_fill_and_advance() {
        let mut buffer = ByteBuffer::allocate(4);
        buffer.writable().unwrap()[..2].copy_from_slice(b"ok");
        buffer.advance(2).unwrap();
        assert!(matches!(buffer.advance(3), Err(NioError::BufferState(_))));
        buffer.flip();
        assert_eq!(buffer.readable(), b"ok");
    }

    #[test]
    fn direct_buffer_behaves_like_heap_buffer() {
        let mut buffer = ByteBuffer::allocate_direct(16).unwrap();
        assert!(buffer.is_direct());
        buffer.put(b"direct").unwrap();
        buffer.flip();
        assert_eq!(buffer.get(6).unwrap(), b"direct");
    }

    #[test]
    fn wrap_is_fully_readable() {
        let mut buffer = ByteBuffer::wrap(b"abc".to_vec());
        assert_eq!(buffer.remaining(), 3);
        assert_eq!(buffer.get(3).unwrap(), b"abc");
        assert!(!buffer.has_remaining());
    }
}
