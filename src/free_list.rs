//! Segregated free lists.
//!
//! Free blocks are grouped into size classes with power of two ranges. Each
//! class is a doubly linked LIFO list of block offsets. The links live in a
//! side table keyed by offset instead of inside the free payloads, so memory
//! handed back to a caller never carries stale list state.

use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;

use crate::tag::MIN_BLOCK_SIZE;

/// log2 of the smallest block size, the lower bound of class 0
const MIN_ORDER: u32 = MIN_BLOCK_SIZE.trailing_zeros();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Link {
    class: usize,
    prev: Option<usize>,
    next: Option<usize>,
}

/// The free list index: one list head per size class and the links of every
/// listed block.
///
/// With zero classes the index is disabled and every operation is a no-op.
#[derive(Debug, Clone)]
pub struct FreeLists {
    heads: Vec<Option<usize>>,
    links: BTreeMap<usize, Link>,
}

impl FreeLists {
    /// Create an empty index with `classes` size classes
    pub fn new(classes: usize) -> Self {
        Self {
            heads: vec![None; classes],
            links: BTreeMap::new(),
        }
    }

    /// Number of size classes
    pub fn classes(&self) -> usize {
        self.heads.len()
    }

    /// Whether there are no lists at all and searches must walk the heap
    pub fn is_disabled(&self) -> bool {
        self.heads.is_empty()
    }

    /// Number of blocks in all lists
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Whether all lists are empty
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Map a block size to its class.
    ///
    /// Class `i` covers `[16 << i, 16 << (i + 1))`, the last class takes
    /// everything above. Must not be called on a disabled index.
    pub fn class_of(&self, size: usize) -> usize {
        debug_assert!(!self.is_disabled());
        let order = usize::BITS - 1 - size.max(1).leading_zeros();
        (order.saturating_sub(MIN_ORDER) as usize).min(self.classes() - 1)
    }

    /// The class a listed block sits in, if it is listed
    pub fn class_of_entry(&self, offset: usize) -> Option<usize> {
        self.links.get(&offset).map(|link| link.class)
    }

    /// Push the block at `offset` of `size` bytes onto the front of its class
    pub fn insert(&mut self, offset: usize, size: usize) {
        if self.is_disabled() {
            return;
        }
        let class = self.class_of(size);
        let head = self.heads[class];
        if let Some(head) = head {
            if let Some(link) = self.links.get_mut(&head) {
                link.prev = Some(offset);
            }
        }
        let old = self.links.insert(
            offset,
            Link {
                class,
                prev: None,
                next: head,
            },
        );
        debug_assert!(old.is_none(), "block {offset:#x} is already listed");
        self.heads[class] = Some(offset);
    }

    /// Unlink the block at `offset`. Blocks that are not listed are ignored.
    pub fn remove(&mut self, offset: usize) {
        let Some(link) = self.links.remove(&offset) else {
            return;
        };
        match link.prev {
            Some(prev) => {
                if let Some(prev) = self.links.get_mut(&prev) {
                    prev.next = link.next;
                }
            }
            None => self.heads[link.class] = link.next,
        }
        if let Some(next) = link.next {
            if let Some(next) = self.links.get_mut(&next) {
                next.prev = link.prev;
            }
        }
    }

    /// Walk one class from its head
    pub fn iter_class(&self, class: usize) -> ClassIter<'_> {
        ClassIter {
            lists: self,
            current: self.heads.get(class).copied().flatten(),
        }
    }

    /// The previous entry of a listed block, `None` inside when it is a head
    pub fn prev_entry(&self, offset: usize) -> Option<Option<usize>> {
        self.links.get(&offset).map(|link| link.prev)
    }

    /// Point a class at the successor of its head without touching any links
    #[cfg(test)]
    pub(crate) fn drop_head(&mut self, class: usize) {
        let head = self.heads[class];
        self.heads[class] = head
            .and_then(|head| self.links.get(&head))
            .and_then(|link| link.next);
    }

    /// Every listed offset, in address order
    pub fn offsets(&self) -> impl Iterator<Item = usize> + '_ {
        self.links.keys().copied()
    }
}

/// Iterator over the offsets of one size class, head first
#[derive(Debug, Clone)]
pub struct ClassIter<'a> {
    lists: &'a FreeLists,
    current: Option<usize>,
}

impl Iterator for ClassIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let current = self.current?;
        self.current = self.lists.links.get(&current).and_then(|link| link.next);
        Some(current)
    }
}
