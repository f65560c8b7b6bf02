//! Explicit doubly linked free list, threaded through free-block payloads.
//!
//! The first payload word of a free block holds the offset of the previous
//! free block, the second the offset of the next. The same bytes are user
//! payload while the block is allocated; the two interpretations are made
//! mutually exclusive by the allocation bit, and link access is confined to
//! this module.
//!
//! The list is LIFO: freed blocks are pushed at the head, so first-fit search
//! visits blocks in reverse-chronological free order. The allocated prologue
//! block anchors the list: search treats it as the terminator, and its link
//! words absorb backward writes so insert and remove need no branching on
//! list position beyond the head check.

use crate::block::NIL;
use crate::region::{Region, WORD};

/// Free-list state: the head offset and the prologue anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeList {
    head: usize,
    prologue: usize,
}

impl FreeList {
    /// A new list anchored at (and initially headed by) the prologue.
    pub fn new(prologue: usize) -> Self {
        Self {
            head: prologue,
            prologue,
        }
    }

    /// Current head offset.
    pub fn head(&self) -> usize {
        self.head
    }

    /// The prologue anchor, which terminates search.
    pub fn prologue(&self) -> usize {
        self.prologue
    }

    /// Previous free block linked from `bp`.
    pub fn prev_of(&self, region: &Region, bp: usize) -> usize {
        region.read_word(bp) as usize
    }

    /// Next free block linked from `bp`.
    pub fn next_of(&self, region: &Region, bp: usize) -> usize {
        region.read_word(bp + WORD) as usize
    }

    fn set_prev(region: &mut Region, bp: usize, to: usize) {
        region.write_word(bp, to as u64);
    }

    fn set_next(region: &mut Region, bp: usize, to: usize) {
        region.write_word(bp + WORD, to as u64);
    }

    /// Pushes the free block at `bp` onto the head of the list. O(1).
    ///
    /// `bp` must be a free block that is not currently in the list.
    pub fn insert(&mut self, region: &mut Region, bp: usize) {
        debug_assert_ne!(bp, self.prologue);
        Self::set_prev(region, bp, NIL);
        Self::set_next(region, bp, self.head);
        Self::set_prev(region, self.head, bp);
        self.head = bp;
    }

    /// Unlinks the block at `bp` from the list. O(1).
    ///
    /// `bp` must currently be in the list.
    pub fn remove(&mut self, region: &mut Region, bp: usize) {
        debug_assert_ne!(bp, self.prologue);
        let prev = self.prev_of(region, bp);
        let next = self.next_of(region, bp);
        if bp == self.head {
            self.head = next;
        } else {
            Self::set_next(region, prev, next);
        }
        // The tail link is the prologue, never NIL; the guard only protects
        // against corrupted links reaching the pad word.
        if next != NIL {
            Self::set_prev(region, next, prev);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{self, MIN_BLOCK_SIZE};

    const PROLOGUE: usize = 16;

    /// Region with a prologue at 16 and three free 32-byte blocks at
    /// 48, 80, and 112.
    fn fixture() -> (Region, FreeList, [usize; 3]) {
        let mut region = Region::new(256);
        region.request(8 + 4 * MIN_BLOCK_SIZE + 8).unwrap();
        block::set_block(&mut region, PROLOGUE, MIN_BLOCK_SIZE, true);
        region.write_word(PROLOGUE, 0);
        region.write_word(PROLOGUE + WORD, 0);
        let blocks = [48, 80, 112];
        for bp in blocks {
            block::set_block(&mut region, bp, MIN_BLOCK_SIZE, false);
        }
        (region, FreeList::new(PROLOGUE), blocks)
    }

    fn collect(list: &FreeList, region: &Region) -> Vec<usize> {
        let mut out = Vec::new();
        let mut bp = list.head();
        while bp != list.prologue() && bp != NIL {
            out.push(bp);
            bp = list.next_of(region, bp);
        }
        out
    }

    #[test]
    fn test_insert_is_lifo() {
        let (mut region, mut list, [a, b, c]) = fixture();
        list.insert(&mut region, a);
        list.insert(&mut region, b);
        list.insert(&mut region, c);
        assert_eq!(collect(&list, &region), vec![c, b, a]);
        assert_eq!(list.prev_of(&region, c), NIL);
        assert_eq!(list.prev_of(&region, b), c);
        assert_eq!(list.prev_of(&region, a), b);
    }

    #[test]
    fn test_remove_head() {
        let (mut region, mut list, [a, b, _]) = fixture();
        list.insert(&mut region, a);
        list.insert(&mut region, b);
        list.remove(&mut region, b);
        assert_eq!(list.head(), a);
        assert_eq!(collect(&list, &region), vec![a]);
        assert_eq!(list.prev_of(&region, a), NIL);
    }

    #[test]
    fn test_remove_middle() {
        let (mut region, mut list, [a, b, c]) = fixture();
        list.insert(&mut region, a);
        list.insert(&mut region, b);
        list.insert(&mut region, c);
        list.remove(&mut region, b);
        assert_eq!(collect(&list, &region), vec![c, a]);
        assert_eq!(list.next_of(&region, c), a);
        assert_eq!(list.prev_of(&region, a), c);
    }

    #[test]
    fn test_remove_tail_writes_prologue_sink() {
        let (mut region, mut list, [a, b, _]) = fixture();
        list.insert(&mut region, a);
        list.insert(&mut region, b);
        list.remove(&mut region, a);
        assert_eq!(collect(&list, &region), vec![b]);
        // The backward fixup landed in the prologue's link word, not at 0.
        assert_eq!(region.read_word(0), 0);
    }

    #[test]
    fn test_empty_after_removing_everything() {
        let (mut region, mut list, [a, b, c]) = fixture();
        for bp in [a, b, c] {
            list.insert(&mut region, bp);
        }
        for bp in [b, a, c] {
            list.remove(&mut region, bp);
        }
        assert_eq!(list.head(), list.prologue());
        assert!(collect(&list, &region).is_empty());
    }
}
