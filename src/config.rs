/*
 * mnio - non-blocking channels, byte buffers and a readiness selector
 * This is free and unencumbered software released into the public domain.
 */
use std::time::Duration;

use crate::{ByteBuffer, Result};

/// Settings of an [`EventLoop`](crate::EventLoop)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    /// OS events received per poll
    pub events_capacity: usize,
    /// Inbound buffer capacity of each stream or pipe endpoint
    pub read_buffer_size: usize,
    /// Outbound buffer capacity of each endpoint; a write that does not fit
    /// is refused with [`NioError::Overflow`](crate::NioError::Overflow)
    pub write_buffer_size: usize,
    /// Largest datagram that can be received without truncation
    pub datagram_buffer_size: usize,
    /// Back endpoint buffers with OS memory instead of the heap
    pub direct_buffers: bool,
    /// Connections accepted per readiness event of a listener
    pub accept_batch: usize,
    /// How long [`EventLoop::run()`](crate::EventLoop::run) polls before it
    /// calls [`Handler::idle()`](crate::Handler::idle)
    pub idle_timeout: Option<Duration>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            events_capacity: 128,
            read_buffer_size: 4096,
            write_buffer_size: 65536,
            datagram_buffer_size: 65536,
            direct_buffers: false,
            accept_batch: 64,
            idle_timeout: Some(Duration::from_secs(1)),
        }
    }
}

impl LoopConfig {
    pub fn with_events_capacity(mut self, capacity: usize) -> Self {
        self.events_capacity = capacity;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    pub fn with_write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size;
        self
    }

    pub fn with_datagram_buffer_size(mut self, size: usize) -> Self {
        self.datagram_buffer_size = size;
        self
    }

    pub fn with_direct_buffers(mut self, direct: bool) -> Self {
        self.direct_buffers = direct;
        self
    }

    pub fn with_accept_batch(mut self, batch: usize) -> Self {
        self.accept_batch = batch.max(1);
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub(crate) fn buffer(&self, capacity: usize) -> Result<ByteBuffer> {
        match self.direct_buffers && capacity > 0 {
            true => ByteBuffer::allocate_direct(capacity),
            false => Ok(ByteBuffer::allocate(capacity)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LoopConfig::default();
        assert_eq!(config.events_capacity, 128);
        assert_eq!(config.read_buffer_size, 4096);
        assert_eq!(config.write_buffer_size, 65536);
        assert!(!config.direct_buffers);
    }

    #[test]
    fn test_buffer_kind() {
        let heap = LoopConfig::default().buffer(16).unwrap();
        assert!(!heap.is_direct());
        let direct = LoopConfig::default().with_direct_buffers(true).buffer(16).unwrap();
        assert!(direct.is_direct());
        assert_eq!(direct.capacity(), 16);
    }
}
