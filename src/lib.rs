//! A boundary tag allocator with segregated free lists
//!
//! The heap is one contiguous region taken from a [`HeapSource`] that only
//! grows. Blocks carry a header and a footer holding their size and an
//! allocated bit, free blocks are coalesced with their neighbours right away,
//! and free blocks are found first fit through power of two size classes.
//! Addresses are offsets into the region, so every access is bounds checked.
//!
//! ```
//! use seglist_alloc::{Config, Heap};
//!
//! let mut heap = Heap::new(Config::SEGREGATED);
//! heap.init().unwrap();
//!
//! let ptr = heap.allocate(16).unwrap();
//! heap.payload_mut(ptr)[..5].copy_from_slice(b"hello");
//!
//! let ptr = heap.reallocate(ptr, 64).unwrap();
//! assert_eq!(&heap.payload(ptr)[..5], b"hello");
//!
//! heap.deallocate(ptr);
//! heap.check().unwrap();
//! ```
//!
//! The number of size classes picks the search strategy: zero walks every
//! block, one keeps a single LIFO free list, more split the free blocks by size.
//! The heap is single threaded and never gives memory back to its source.

#![no_std]
#![deny(
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unstable_features,
    unused_import_braces,
    unused_qualifications
)]

extern crate alloc;

mod config;
mod error;
mod free_list;
mod heap;
mod source;
mod tag;

pub use config::{Config, CHUNK_SIZE, MAX_SIZE_CLASSES};
pub use error::{CheckError, InitError, OutOfMemory, OutOfMemorySnafu};
pub use heap::{Address, BlockInfo, Heap};
pub use source::{Arena, HeapSource};
pub use tag::{MIN_BLOCK_SIZE, OVERHEAD};
