//! Where heap memory comes from.
//!
//! A [`HeapSource`] behaves like a program break: it hands out one contiguous
//! region that only ever grows at the top. Offsets into that region are the
//! addresses the allocator works with.

use alloc::vec::Vec;

use crate::error::{OutOfMemory, OutOfMemorySnafu};
use crate::tag::MAX_BLOCK_SIZE;

/// A contiguous, grow-only memory region.
pub trait HeapSource {
    /// Extend the region by `incr` bytes and return the old break, which is
    /// the offset of the first new byte.
    fn grow(&mut self, incr: usize) -> Result<usize, OutOfMemory>;

    /// Rewind the break to zero, dropping everything handed out so far
    fn reset(&mut self);

    /// The bytes below the break
    fn bytes(&self) -> &[u8];

    /// The bytes below the break, writable
    fn bytes_mut(&mut self) -> &mut [u8];

    /// The current break
    fn brk(&self) -> usize {
        self.bytes().len()
    }
}

/// A heap source backed by a vector, bounded by a fixed limit.
#[derive(Debug, Clone)]
pub struct Arena {
    mem: Vec<u8>,
    limit: usize,
}

impl Arena {
    /// Default ceiling on the total size of the region, 20 MiB
    pub const DEFAULT_LIMIT: usize = 20 * (1 << 20);

    /// Create an empty arena that will grow to at most `limit` bytes.
    /// Limits beyond what a tag word can describe are clamped.
    pub fn new(limit: usize) -> Self {
        Self {
            mem: Vec::new(),
            limit: limit.min(MAX_BLOCK_SIZE),
        }
    }

    /// The most bytes this arena will ever hand out
    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LIMIT)
    }
}

impl HeapSource for Arena {
    fn grow(&mut self, incr: usize) -> Result<usize, OutOfMemory> {
        let brk = self.mem.len();
        let fail = OutOfMemorySnafu {
            requested: incr,
            brk,
            limit: self.limit,
        };
        if incr > self.limit - brk || self.mem.try_reserve(incr).is_err() {
            return fail.fail();
        }
        self.mem.resize(brk + incr, 0);
        Ok(brk)
    }

    fn reset(&mut self) {
        self.mem.clear();
    }

    fn bytes(&self) -> &[u8] {
        &self.mem
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.mem
    }
}
