//! Idle buffer pool
//!
//! Producers ask the dispatcher for a buffer before encoding a frame into it.
//! Payloads of evicted slots come back here when nothing else holds them, so
//! a steady-state stream stops allocating after warm-up.

use bytes::{Bytes, BytesMut};

/// Pool of reusable payload buffers
#[derive(Debug)]
pub struct BufferPool {
    /// Idle buffers, oldest first
    idle: Vec<BytesMut>,
    /// Maximum number of idle buffers kept after housekeeping
    limit: usize,
    /// Buffers handed out from the pool
    reused: u64,
    /// Buffers allocated because nothing suitable was idle
    allocated: u64,
}

impl BufferPool {
    /// Create a pool keeping at most `limit` idle buffers
    pub fn new(limit: usize) -> Self {
        Self {
            idle: Vec::new(),
            limit,
            reused: 0,
            allocated: 0,
        }
    }

    /// Take a cleared buffer with at least `size` bytes of capacity
    ///
    /// Returns `None` for a zero-sized request.
    pub fn request(&mut self, size: usize) -> Option<BytesMut> {
        if size == 0 {
            return None;
        }

        // Smallest idle buffer that fits
        let best = self
            .idle
            .iter()
            .enumerate()
            .filter(|(_, buf)| buf.capacity() >= size)
            .min_by_key(|(_, buf)| buf.capacity())
            .map(|(i, _)| i);

        match best {
            Some(i) => {
                let mut buf = self.idle.swap_remove(i);
                buf.clear();
                self.reused += 1;
                Some(buf)
            }
            None => {
                self.allocated += 1;
                Some(BytesMut::with_capacity(size))
            }
        }
    }

    /// Return a frozen payload to the pool if it is uniquely owned
    ///
    /// Returns true if the allocation was recovered.
    pub fn reclaim(&mut self, data: Bytes) -> bool {
        match data.try_into_mut() {
            Ok(mut buf) if buf.capacity() > 0 => {
                buf.clear();
                self.idle.push(buf);
                true
            }
            _ => false,
        }
    }

    /// Drop idle buffers beyond the limit, oldest first
    ///
    /// Returns the number of buffers released.
    pub fn release_idle(&mut self) -> usize {
        if self.idle.len() <= self.limit {
            return 0;
        }
        let excess = self.idle.len() - self.limit;
        self.idle.drain(..excess);
        excess
    }

    /// Number of idle buffers
    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }

    /// Buffers handed out from the pool so far
    pub fn reused(&self) -> u64 {
        self.reused
    }

    /// Buffers allocated fresh so far
    pub fn allocated(&self) -> u64 {
        self.allocated
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(16)
    }
}
