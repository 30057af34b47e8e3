//! Tunables of a [`Heap`](crate::Heap).

use crate::tag::{MAX_BLOCK_SIZE, MIN_BLOCK_SIZE};

/// Default minimum heap growth when no free block fits
pub const CHUNK_SIZE: usize = 1 << 12;

/// Most size classes a heap can use. Classes past this one would start above
/// the largest size a tag word can record.
pub const MAX_SIZE_CLASSES: usize =
    (u32::BITS - MIN_BLOCK_SIZE.trailing_zeros()) as usize;

/// How a heap organizes its free blocks and how eagerly it grows.
///
/// `size_classes` picks the free list organization:
///
/// - `0`: no free lists at all, every search walks the whole heap
/// - `1`: one explicit LIFO free list
/// - `n`: `n` segregated free lists with power of two size ranges
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Number of segregated free lists
    pub size_classes: usize,
    /// Minimum number of bytes to grow the heap by on a miss
    pub chunk_size: usize,
    /// Size of the free block `init` seeds the heap with
    pub initial_size: usize,
}

impl Config {
    /// Scan every block on each search
    pub const IMPLICIT: Self = Self::new(0);

    /// A single explicit free list
    pub const EXPLICIT: Self = Self::new(1);

    /// Twenty segregated free lists, the last one holding blocks of 8 MiB and up
    pub const SEGREGATED: Self = Self::new(20);

    /// A config with `size_classes` free lists and default growth sizes
    pub const fn new(size_classes: usize) -> Self {
        Self {
            size_classes,
            chunk_size: CHUNK_SIZE,
            initial_size: CHUNK_SIZE,
        }
    }

    /// Set the minimum growth on a miss
    #[must_use]
    pub const fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Set the size of the initial free block
    #[must_use]
    pub const fn with_initial_size(mut self, initial_size: usize) -> Self {
        self.initial_size = initial_size;
        self
    }

    /// Make sure growth sizes fit between one minimum block and the largest
    /// block a tag can describe
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.size_classes > MAX_SIZE_CLASSES {
            return Err("too many size classes");
        }
        if self.chunk_size < MIN_BLOCK_SIZE {
            return Err("chunk size is smaller than the minimum block size");
        }
        if self.chunk_size > MAX_BLOCK_SIZE {
            return Err("chunk size is larger than any block");
        }
        if self.initial_size < MIN_BLOCK_SIZE {
            return Err("initial size is smaller than the minimum block size");
        }
        if self.initial_size > MAX_BLOCK_SIZE {
            return Err("initial size is larger than any block");
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::SEGREGATED
    }
}
