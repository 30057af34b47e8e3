//! The allocator core.
//!
//! The heap is a sequence of blocks between an allocated 8 byte prologue and
//! a zero sized allocated epilogue header that always sits right below the
//! break:
//!
//! ```text
//!  0      4        8        12              brk-4     brk
//!  ┌──────┬────────┬────────┬───────┬───┬─────┬─────────┐
//!  │ pad  │ pro hdr│ pro ftr│ hdr   │...│ ftr │ epi hdr │
//!  └──────┴────────┴────────┴───────┴───┴─────┴─────────┘
//!                           ▲
//!                           └── first payload, offset 16
//! ```
//!
//! Every block carries a header and a footer with its size and allocated
//! bit, so both physical neighbours of a block can be found in constant time.
//! Free blocks are merged with their free neighbours as soon as they appear.

use core::{cmp, fmt, iter};

use log::{debug, trace};
use snafu::{ensure, OptionExt, ResultExt};

use crate::config::Config;
use crate::error::{
    AdjacentFreeSnafu, BadEpilogueSnafu, BadPrologueSnafu, BrokenListSnafu, CheckError,
    ConfigSnafu, InitError, MisalignedSnafu, NotInFreeListSnafu, OutOfBoundsSnafu, OutOfMemory,
    OutOfMemorySnafu, ReserveSnafu, SeedSnafu, SizeMismatchSnafu, StrayFreeEntrySnafu,
    TagMismatchSnafu, TooSmallSnafu, UnreachableFreeSnafu, UninitializedSnafu, WrongClassSnafu,
};
use crate::free_list::FreeLists;
use crate::source::{Arena, HeapSource};
use crate::tag::{
    adjusted_size, write_word, Tag, DSIZE, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE, OVERHEAD,
    WSIZE,
};

/// Bytes taken by the padding word, the prologue and the epilogue
const RESERVED: usize = 4 * WSIZE;

/// The prologue is a header and a footer with nothing in between
const PROLOGUE: Tag = Tag::new(DSIZE, true);

/// The payload offset of an allocated block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(usize);

impl Address {
    /// Offset of the payload from the bottom of the heap
    pub const fn offset(self) -> usize {
        self.0
    }
}

/// One block as seen by a walk over the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Payload offset of the block
    pub address: Address,
    /// Size of the block, header and footer included
    pub size: usize,
    /// Whether the block is allocated
    pub allocated: bool,
}

/// A boundary tag allocator over a grow-only [`HeapSource`].
pub struct Heap<S = Arena> {
    source: S,
    config: Config,
    free: FreeLists,
    /// Payload offset of the prologue, `None` until the heap is initialized
    prologue: Option<usize>,
}

impl Heap<Arena> {
    /// Create a heap on a default sized [`Arena`], must init before using
    pub fn new(config: Config) -> Self {
        Self::with_source(Arena::default(), config)
    }
}

impl Default for Heap<Arena> {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl<S: HeapSource> Heap<S> {
    /// Create a heap that takes its memory from `source`, must init before using
    pub fn with_source(source: S, config: Config) -> Self {
        Self {
            source,
            config,
            free: FreeLists::new(0),
            prologue: None,
        }
    }

    /// The configuration this heap was built with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The memory source backing this heap
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Whether [`init`](Self::init) has succeeded
    pub fn is_initialized(&self) -> bool {
        self.prologue.is_some()
    }

    /// Total bytes taken from the source
    pub fn heap_size(&self) -> usize {
        self.source.brk()
    }

    /// Set up an empty heap with one free block of `initial_size` bytes.
    ///
    /// Calling this again rewinds the source and starts over, every address
    /// handed out before becomes invalid.
    pub fn init(&mut self) -> Result<(), InitError> {
        self.config
            .validate()
            .map_err(|reason| ConfigSnafu { reason }.build())?;

        self.prologue = None;
        self.source.reset();
        self.free = FreeLists::new(self.config.size_classes);

        let base = self.source.grow(RESERVED).context(ReserveSnafu)?;
        let mem = self.source.bytes_mut();
        write_word(mem, base, 0); // alignment padding
        PROLOGUE.write(mem, base + WSIZE);
        PROLOGUE.write(mem, base + 2 * WSIZE);
        Tag::EPILOGUE.write(mem, base + 3 * WSIZE);
        self.prologue = Some(base + DSIZE);

        let bytes = self.config.initial_size;
        if let Err(err) = self.extend(bytes / WSIZE).context(SeedSnafu { bytes }) {
            self.prologue = None;
            return Err(err);
        }

        debug!(
            "heap initialized with {} size classes, break at {:#x}",
            self.free.classes(),
            self.source.brk()
        );
        Ok(())
    }

    /// Allocate at least `size` bytes, 8 byte aligned.
    ///
    /// Returns `None` for a zero sized request or when the source cannot grow
    /// any more. An uninitialized heap is initialized first.
    pub fn allocate(&mut self, size: usize) -> Option<Address> {
        if size == 0 {
            return None;
        }
        if !self.is_initialized() {
            if let Err(err) = self.init() {
                debug!("cannot allocate {size} bytes: {err}");
                return None;
            }
        }
        if size > MAX_BLOCK_SIZE - OVERHEAD {
            debug!("cannot allocate {size} bytes: larger than any block");
            return None;
        }

        let asize = adjusted_size(size);
        let bp = match self.find_fit(asize) {
            Some(bp) => bp,
            None => {
                let extend = cmp::max(asize, self.config.chunk_size);
                match self.extend(extend / WSIZE) {
                    Ok(bp) => bp,
                    Err(err) => {
                        debug!("cannot allocate {size} bytes: {err}");
                        return None;
                    }
                }
            }
        };
        self.place(bp, asize);

        trace!("allocate({size}) -> {bp:#x}");
        Some(Address(bp))
    }

    /// Give a block back to the heap.
    ///
    /// `ptr` must come from [`allocate`](Self::allocate) or
    /// [`reallocate`](Self::reallocate) on this heap and must not have been
    /// freed already. Misuse is not detected and corrupts the heap.
    pub fn deallocate(&mut self, ptr: Address) {
        if !self.is_initialized() {
            return;
        }
        let bp = ptr.0;
        let size = self.size(bp);
        self.set_tags(bp, Tag::new(size, false));

        trace!("deallocate({bp:#x}), {size} bytes");
        self.coalesce(bp);
    }

    /// Move an allocation into a block of at least `size` bytes.
    ///
    /// The contents are copied up to the smaller of the two sizes. If no new
    /// block can be had, `None` is returned and `ptr` stays allocated and
    /// untouched. A `size` of zero frees `ptr` and returns `None`.
    pub fn reallocate(&mut self, ptr: Address, size: usize) -> Option<Address> {
        if size == 0 {
            self.deallocate(ptr);
            return None;
        }

        let new = self.allocate(size)?;
        let copy = cmp::min(self.usable_size(ptr), size);
        self.source
            .bytes_mut()
            .copy_within(ptr.0..ptr.0 + copy, new.0);
        self.deallocate(ptr);

        trace!("reallocate({:#x}, {size}) -> {:#x}", ptr.0, new.0);
        Some(new)
    }

    /// Bytes the caller may use at `ptr`, at least what was asked for
    pub fn usable_size(&self, ptr: Address) -> usize {
        self.size(ptr.0) - OVERHEAD
    }

    /// The usable bytes of the live allocation at `ptr`
    pub fn payload(&self, ptr: Address) -> &[u8] {
        let len = self.usable_size(ptr);
        &self.source.bytes()[ptr.0..ptr.0 + len]
    }

    /// The usable bytes of the live allocation at `ptr`, writable
    pub fn payload_mut(&mut self, ptr: Address) -> &mut [u8] {
        let len = self.usable_size(ptr);
        &mut self.source.bytes_mut()[ptr.0..ptr.0 + len]
    }

    /// Walk all blocks from the first one up to the epilogue
    pub fn blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
        let first = self.prologue.map(|prologue| prologue + DSIZE);
        iter::successors(first, move |&bp| Some(self.next_block(bp)))
            .map(move |bp| (bp, self.header(bp)))
            .take_while(|(_, tag)| tag.size > 0)
            .map(|(bp, tag)| BlockInfo {
                address: Address(bp),
                size: tag.size,
                allocated: tag.allocated,
            })
    }

    /// Number of free blocks in the heap
    pub fn free_blocks(&self) -> usize {
        self.blocks().filter(|block| !block.allocated).count()
    }

    /// Verify the heap invariants, stopping at the first violation.
    ///
    /// Checks the prologue and epilogue, alignment, matching boundary tags,
    /// the minimum block size, that no two free blocks touch, that the free
    /// lists hold exactly the free blocks each in the right class, and that
    /// the blocks cover the whole heap.
    pub fn check(&self) -> Result<(), CheckError> {
        let prologue = self.prologue.context(UninitializedSnafu)?;
        let mem = self.source.bytes();
        let brk = mem.len();

        ensure!(
            Tag::read(mem, prologue - WSIZE) == PROLOGUE && Tag::read(mem, prologue) == PROLOGUE,
            BadPrologueSnafu { at: prologue }
        );

        let first = prologue + DSIZE;
        let mut bp = first;
        let mut covered = 0;
        let mut free_count = 0;
        let mut prev_free = None;
        loop {
            ensure!(bp <= brk, BadEpilogueSnafu { at: bp - WSIZE });
            let tag = Tag::read(mem, bp - WSIZE);
            if tag.size == 0 {
                ensure!(tag.allocated && bp == brk, BadEpilogueSnafu { at: bp - WSIZE });
                break;
            }

            ensure!(bp % DSIZE == 0, MisalignedSnafu { at: bp });
            ensure!(
                tag.size >= MIN_BLOCK_SIZE,
                TooSmallSnafu {
                    at: bp,
                    size: tag.size
                }
            );
            ensure!(bp + tag.size <= brk, OutOfBoundsSnafu { at: bp });
            ensure!(
                Tag::read(mem, bp + tag.size - DSIZE) == tag,
                TagMismatchSnafu { at: bp }
            );

            if tag.allocated {
                prev_free = None;
            } else {
                if let Some(prev) = prev_free {
                    return AdjacentFreeSnafu { at: prev }.fail();
                }
                if !self.free.is_disabled() {
                    let found = self
                        .free
                        .class_of_entry(bp)
                        .context(NotInFreeListSnafu { at: bp })?;
                    let expected = self.free.class_of(tag.size);
                    ensure!(
                        found == expected,
                        WrongClassSnafu {
                            at: bp,
                            found,
                            expected
                        }
                    );
                }
                free_count += 1;
                prev_free = Some(bp);
            }

            covered += tag.size;
            bp += tag.size;
        }

        if !self.free.is_disabled() {
            if self.free.len() != free_count {
                let is_free_block =
                    |at: usize| self.blocks().any(|b| b.address.0 == at && !b.allocated);
                if let Some(at) = self.free.offsets().find(|&at| !is_free_block(at)) {
                    return StrayFreeEntrySnafu { at }.fail();
                }
            }
            self.check_lists()?;
        }

        let expected = brk - (prologue - DSIZE) - RESERVED;
        ensure!(
            covered == expected,
            SizeMismatchSnafu {
                blocks: covered,
                expected
            }
        );
        Ok(())
    }

    /// Walk every class from its head, making sure the back links agree and
    /// that every listed block can be reached
    fn check_lists(&self) -> Result<(), CheckError> {
        let mut reached = 0;
        for class in 0..self.free.classes() {
            let mut prev = None;
            for at in self.free.iter_class(class) {
                // a cycle would walk more entries than there are
                ensure!(reached < self.free.len(), BrokenListSnafu { at });
                ensure!(
                    self.free.prev_entry(at) == Some(prev)
                        && self.free.class_of_entry(at) == Some(class),
                    BrokenListSnafu { at }
                );
                reached += 1;
                prev = Some(at);
            }
        }

        if reached != self.free.len() {
            let is_reached = |at: usize| {
                (0..self.free.classes())
                    .any(|class| self.free.iter_class(class).any(|listed| listed == at))
            };
            if let Some(at) = self.free.offsets().find(|&at| !is_reached(at)) {
                return UnreachableFreeSnafu { at }.fail();
            }
        }
        Ok(())
    }

    /// First fit over the size classes starting at the class of `asize`, or
    /// over every block when there are no free lists.
    fn find_fit(&self, asize: usize) -> Option<usize> {
        if self.free.is_disabled() {
            return self
                .blocks()
                .find(|block| !block.allocated && block.size >= asize)
                .map(|block| block.address.0);
        }

        if self.free.is_empty() {
            return None;
        }
        (self.free.class_of(asize)..self.free.classes())
            .flat_map(|class| self.free.iter_class(class))
            .find(|&bp| self.size(bp) >= asize)
    }

    /// Allocate `asize` bytes at the start of the free block `bp`, splitting
    /// off the rest if it can stand as a block of its own.
    fn place(&mut self, bp: usize, asize: usize) {
        let csize = self.size(bp);
        self.free.remove(bp);

        if csize - asize >= MIN_BLOCK_SIZE {
            self.set_tags(bp, Tag::new(asize, true));
            let rest = bp + asize;
            self.set_tags(rest, Tag::new(csize - asize, false));
            self.coalesce(rest);
        } else {
            self.set_tags(bp, Tag::new(csize, true));
        }
    }

    /// Merge the unlisted free block `bp` with its free neighbours and list
    /// the result. Returns the payload offset of the merged block.
    fn coalesce(&mut self, bp: usize) -> usize {
        let prev_free = !Tag::read(self.source.bytes(), bp - DSIZE).allocated;
        let next = self.next_block(bp);
        let next_free = !self.header(next).allocated;

        let (start, end) = match (prev_free, next_free) {
            (false, false) => (bp, next),
            (false, true) => (bp, self.unlist(next)),
            (true, false) => {
                let prev = self.prev_block(bp);
                self.unlist(prev);
                (prev, next)
            }
            (true, true) => {
                let prev = self.prev_block(bp);
                self.unlist(prev);
                (prev, self.unlist(next))
            }
        };

        let size = end - start;
        self.set_tags(start, Tag::new(size, false));
        self.free.insert(start, size);

        trace!(
            "coalesce({bp:#x}) prev free: {prev_free}, next free: {next_free} -> {start:#x}, {size} bytes"
        );
        start
    }

    /// Grow the heap by `words` words, rounded up to keep double word
    /// alignment, and return the new free block after coalescing.
    fn extend(&mut self, words: usize) -> Result<usize, OutOfMemory> {
        let size = words
            .checked_add(words % 2)
            .and_then(|words| words.checked_mul(WSIZE))
            .filter(|&size| size <= MAX_BLOCK_SIZE);
        let Some(size) = size else {
            return OutOfMemorySnafu {
                requested: words.saturating_mul(WSIZE),
                brk: self.source.brk(),
                limit: MAX_BLOCK_SIZE,
            }
            .fail();
        };
        let bp = self.source.grow(size)?;

        // the new header lands on the old epilogue
        self.set_tags(bp, Tag::new(size, false));
        Tag::EPILOGUE.write(self.source.bytes_mut(), bp + size - WSIZE);

        debug!(
            "heap extended by {size} bytes, break at {:#x}",
            self.source.brk()
        );
        Ok(self.coalesce(bp))
    }

    /// Take a free block out of its list and return the offset just past it
    fn unlist(&mut self, bp: usize) -> usize {
        self.free.remove(bp);
        self.next_block(bp)
    }

    fn header(&self, bp: usize) -> Tag {
        Tag::read(self.source.bytes(), bp - WSIZE)
    }

    fn size(&self, bp: usize) -> usize {
        self.header(bp).size
    }

    fn next_block(&self, bp: usize) -> usize {
        bp + self.size(bp)
    }

    fn prev_block(&self, bp: usize) -> usize {
        bp - Tag::read(self.source.bytes(), bp - DSIZE).size
    }

    /// Write matching header and footer for a block of `tag.size` bytes at `bp`
    fn set_tags(&mut self, bp: usize, tag: Tag) {
        let mem = self.source.bytes_mut();
        tag.write(mem, bp - WSIZE);
        tag.write(mem, bp + tag.size - DSIZE);
    }
}

impl<S: HeapSource> fmt::Debug for Heap<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // we want a better debug for this type
        #[derive(Debug)]
        struct Block {
            heap_ptr: Hex,
            size: usize,
            allocated: bool,
        }

        struct Hex(usize);

        impl fmt::Debug for Hex {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#X}", self.0)
            }
        }

        f.debug_list()
            .entries(self.blocks().map(|block| Block {
                heap_ptr: Hex(block.address.0),
                size: block.size,
                allocated: block.allocated,
            }))
            .finish()
    }
}
