//! Boundary tags: the header and footer words that bracket every block.

use bitflags::bitflags;

/// Word and header/footer size in bytes
pub const WSIZE: usize = 4;

/// Double word size in bytes, also the payload alignment
pub const DSIZE: usize = 8;

/// Bytes a block spends on its header and footer
pub const OVERHEAD: usize = DSIZE;

/// The smallest block that can exist: header, footer and one double word of payload
pub const MIN_BLOCK_SIZE: usize = 2 * DSIZE;

bitflags! {
    /// The low bits of a tag word. The size is always a multiple of 8, so the 3
    /// least significant bits are free to carry metadata about the block.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct TagBits: u32 {
        /// The block is allocated
        const ALLOCATED = 0b1;
    }
}

/// Mask of the bits of a tag word that hold the size
const SIZE_MASK: u32 = !0b111;

/// The largest size a tag word can record
pub const MAX_BLOCK_SIZE: usize = SIZE_MASK as usize;

/// A decoded header or footer.
///
/// Tags only become a 4-byte word when they are stored into the arena, see
/// [`Tag::to_word`] and [`Tag::from_word`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag {
    /// Size of the whole block in bytes, header and footer included
    pub size: usize,
    /// Whether the block is allocated
    pub allocated: bool,
}

impl Tag {
    /// The zero sized, allocated tag that terminates the heap
    pub const EPILOGUE: Self = Self::new(0, true);

    /// Create a new tag
    pub const fn new(size: usize, allocated: bool) -> Self {
        Self { size, allocated }
    }

    /// Decode a tag from its in-memory word
    pub fn from_word(word: u32) -> Self {
        let bits = TagBits::from_bits_retain(word);
        Self {
            size: (word & SIZE_MASK) as usize,
            allocated: bits.contains(TagBits::ALLOCATED),
        }
    }

    /// Encode the tag into its in-memory word
    pub fn to_word(self) -> u32 {
        debug_assert!(self.size % DSIZE == 0, "block size must be a multiple of 8");
        debug_assert!(self.size <= MAX_BLOCK_SIZE, "block size must fit in a tag word");
        let mut bits = TagBits::from_bits_retain(self.size as u32);
        bits.set(TagBits::ALLOCATED, self.allocated);
        bits.bits()
    }

    /// Read the tag stored at `offset`
    pub fn read(mem: &[u8], offset: usize) -> Self {
        Self::from_word(read_word(mem, offset))
    }

    /// Store the tag at `offset`
    pub fn write(self, mem: &mut [u8], offset: usize) {
        write_word(mem, offset, self.to_word());
    }
}

/// Read a raw 4-byte word at `offset`
pub fn read_word(mem: &[u8], offset: usize) -> u32 {
    let mut word = [0; WSIZE];
    word.copy_from_slice(&mem[offset..offset + WSIZE]);
    u32::from_le_bytes(word)
}

/// Write a raw 4-byte word at `offset`
pub fn write_word(mem: &mut [u8], offset: usize, word: u32) {
    mem[offset..offset + WSIZE].copy_from_slice(&word.to_le_bytes());
}

/// panics if it would round above usize::MAX or round_to is 0
pub fn round_to(value: usize, round_to: usize) -> usize {
    (value + (round_to - 1)) & !(round_to - 1)
}

/// Block size needed to serve a request of `size` payload bytes
pub fn adjusted_size(size: usize) -> usize {
    round_to(size + OVERHEAD, DSIZE).max(MIN_BLOCK_SIZE)
}
