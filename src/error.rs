//! Errors reported by the heap and its memory source.

use snafu::Snafu;

/// The heap source could not grow any further.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
#[snafu(display("cannot grow the heap by {requested} bytes (break at {brk:#x}, limit {limit:#x})"))]
pub struct OutOfMemory {
    /// Bytes the caller asked for
    pub requested: usize,
    /// Break before the failed request
    pub brk: usize,
    /// Most bytes the source will ever hand out
    pub limit: usize,
}

/// Errors that can occur while setting up a heap.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum InitError {
    /// The configuration cannot describe a working heap
    #[snafu(display("invalid configuration: {reason}"))]
    Config {
        /// What is wrong with it
        reason: &'static str,
    },
    /// Reserving the prologue and epilogue words failed
    #[snafu(display("failed to reserve the initial heap"))]
    Reserve {
        /// Why the source refused
        source: OutOfMemory,
    },
    /// Creating the first free block failed
    #[snafu(display("failed to seed the heap with {bytes} bytes"))]
    Seed {
        /// Size of the seed extension
        bytes: usize,
        /// Why the source refused
        source: OutOfMemory,
    },
}

/// A broken heap invariant, found by [`Heap::check`](crate::Heap::check).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CheckError {
    /// The heap has not been initialized
    #[snafu(display("heap is not initialized"))]
    Uninitialized,
    /// The prologue block is not an allocated 8 byte block
    #[snafu(display("bad prologue at {at:#x}"))]
    BadPrologue {
        /// Payload offset of the prologue
        at: usize,
    },
    /// The block walk did not end on a zero sized allocated header at the break
    #[snafu(display("bad epilogue at {at:#x}"))]
    BadEpilogue {
        /// Offset of the last header seen
        at: usize,
    },
    /// A payload is not double word aligned
    #[snafu(display("block at {at:#x} is not 8 byte aligned"))]
    Misaligned {
        /// Payload offset of the block
        at: usize,
    },
    /// A block runs past the break
    #[snafu(display("block at {at:#x} runs past the end of the heap"))]
    OutOfBounds {
        /// Payload offset of the block
        at: usize,
    },
    /// Header and footer disagree
    #[snafu(display("header and footer of block at {at:#x} do not match"))]
    TagMismatch {
        /// Payload offset of the block
        at: usize,
    },
    /// A block is smaller than the minimum block size
    #[snafu(display("block at {at:#x} has size {size}"))]
    TooSmall {
        /// Payload offset of the block
        at: usize,
        /// Its recorded size
        size: usize,
    },
    /// Two neighbouring blocks are both free
    #[snafu(display("blocks at {at:#x} and its successor are both free"))]
    AdjacentFree {
        /// Payload offset of the first of the pair
        at: usize,
    },
    /// A free block is missing from the free lists
    #[snafu(display("free block at {at:#x} is not in any free list"))]
    NotInFreeList {
        /// Payload offset of the block
        at: usize,
    },
    /// A free block sits in a bucket its size does not map to
    #[snafu(display("free block at {at:#x} is in class {found}, expected {expected}"))]
    WrongClass {
        /// Payload offset of the block
        at: usize,
        /// Class it was found in
        found: usize,
        /// Class its size maps to
        expected: usize,
    },
    /// The free lists hold an offset that is not a free block
    #[snafu(display("free list entry {at:#x} is not a free block"))]
    StrayFreeEntry {
        /// The offending entry
        at: usize,
    },
    /// A free list link does not point back where it came from
    #[snafu(display("free list is broken at {at:#x}"))]
    BrokenList {
        /// The entry whose links disagree
        at: usize,
    },
    /// A listed block cannot be reached from any list head
    #[snafu(display("free list entry {at:#x} is unreachable"))]
    UnreachableFree {
        /// The entry no walk reaches
        at: usize,
    },
    /// Block sizes do not add up to the heap size
    #[snafu(display("blocks cover {blocks} bytes, expected {expected}"))]
    SizeMismatch {
        /// Sum of all block sizes
        blocks: usize,
        /// Heap size minus the fixed overhead
        expected: usize,
    },
}
