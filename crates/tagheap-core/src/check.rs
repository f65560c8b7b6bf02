//! Heap consistency auditing.
//!
//! The auditor walks the physical block chain and the free list
//! independently and cross-checks them: every tag pair must match, the chain
//! must run from the prologue to the epilogue with no two adjacent free
//! blocks, and the free list must contain exactly the physically free blocks
//! with consistent bidirectional links. Violations are reported, never
//! repaired.

use thiserror::Error;

use crate::block::{self, DWORD, MIN_BLOCK_SIZE, NIL};
use crate::heap::Heap;
use crate::region::WORD;

/// A single invariant violation found by [`Heap::audit`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HeapViolation {
    #[error("alignment pad word at offset 0 is nonzero")]
    PadCorrupted,
    #[error("prologue tags are not a matched (32, allocated) pair")]
    BadPrologue,
    #[error("block pointer {bp:#x} is not 16-byte aligned")]
    Misaligned { bp: usize },
    #[error("header of block {bp:#x} has reserved low bits set: {word:#x}")]
    ReservedBits { bp: usize, word: u64 },
    #[error("block {bp:#x} is undersized: {size} bytes")]
    Undersized { bp: usize, size: usize },
    #[error("header/footer mismatch at block {bp:#x}: header {header:#x}, footer {footer:#x}")]
    TagMismatch { bp: usize, header: u64, footer: u64 },
    #[error("physical chain runs past the heap end at block {bp:#x}")]
    ChainOverrun { bp: usize },
    #[error("heap does not end with a zero-size allocated epilogue header")]
    BadEpilogue,
    #[error("physical chain never reaches the epilogue")]
    EpilogueUnreachable,
    #[error("adjacent free blocks: {bp:#x} follows another free block")]
    AdjacentFree { bp: usize },
    #[error("free list links to {bp:#x}, which lies outside the block area")]
    LinkOutOfBounds { bp: usize },
    #[error("free-list member {bp:#x} has its allocation bit set")]
    NotFree { bp: usize },
    #[error("prev link of free-list member {bp:#x} does not match its list predecessor")]
    LinkBroken { bp: usize },
    #[error("free list does not terminate within the block population")]
    FreeListCycle,
    #[error("free list terminated at null instead of the prologue anchor")]
    BadTerminator,
    #[error("free list holds {in_list} blocks but the chain has {physically_free} free blocks")]
    MembershipMismatch {
        in_list: usize,
        physically_free: usize,
    },
}

impl Heap {
    /// Verifies every heap invariant and returns the violations found.
    ///
    /// An empty result means the heap is consistent. The walk is defensive:
    /// it bounds its own iteration and stops descending through state it has
    /// already found to be corrupt.
    pub fn audit(&self) -> Vec<HeapViolation> {
        let mut violations = Vec::new();
        let region = &self.region;
        let hi = region.hi();
        // No well-formed heap holds more blocks than this.
        let max_steps = hi / MIN_BLOCK_SIZE + 2;

        if region.read_word(0) != 0 {
            violations.push(HeapViolation::PadCorrupted);
        }

        let prologue_tag = block::pack(MIN_BLOCK_SIZE, true);
        if region.read_word(block::header_off(self.prologue)) != prologue_tag
            || region.read_word(self.prologue + MIN_BLOCK_SIZE - DWORD) != prologue_tag
        {
            violations.push(HeapViolation::BadPrologue);
        }

        // Physical chain, prologue to epilogue.
        let mut physically_free = 0usize;
        let mut prev_was_free = false;
        let mut reached_epilogue = false;
        let mut bp = self.prologue;
        for _ in 0..max_steps {
            let header = region.read_word(block::header_off(bp));
            let size = block::word_size(header);
            if size == 0 {
                if !block::word_alloc(header) || block::header_off(bp) != hi - WORD {
                    violations.push(HeapViolation::BadEpilogue);
                }
                reached_epilogue = true;
                break;
            }
            if bp % DWORD != 0 {
                violations.push(HeapViolation::Misaligned { bp });
                break;
            }
            if header & 0xE != 0 {
                violations.push(HeapViolation::ReservedBits { bp, word: header });
            }
            if size < MIN_BLOCK_SIZE {
                violations.push(HeapViolation::Undersized { bp, size });
                break;
            }
            let Some(end) = bp.checked_add(size) else {
                violations.push(HeapViolation::ChainOverrun { bp });
                break;
            };
            // The last real block ends exactly at the brk; its successor
            // header read is the epilogue at `hi - WORD`.
            if end > hi {
                violations.push(HeapViolation::ChainOverrun { bp });
                break;
            }
            let footer = region.read_word(bp + size - DWORD);
            if footer != header {
                violations.push(HeapViolation::TagMismatch { bp, header, footer });
            }
            let alloc = block::word_alloc(header);
            if !alloc {
                if prev_was_free {
                    violations.push(HeapViolation::AdjacentFree { bp });
                }
                physically_free += 1;
            }
            prev_was_free = !alloc;
            bp = end;
        }
        if !reached_epilogue {
            violations.push(HeapViolation::EpilogueUnreachable);
        }

        // Free list, independently of the chain.
        let first_bp = self.prologue + MIN_BLOCK_SIZE;
        let mut in_list = 0usize;
        let mut came_from = NIL;
        let mut bp = self.flist.head();
        let mut steps = 0usize;
        loop {
            if bp == self.flist.prologue() {
                break;
            }
            if bp == NIL {
                violations.push(HeapViolation::BadTerminator);
                break;
            }
            if steps >= max_steps {
                violations.push(HeapViolation::FreeListCycle);
                break;
            }
            steps += 1;
            // A real free block spans at least MIN_BLOCK_SIZE up to the brk,
            // which also keeps both link-word reads in bounds.
            if bp < first_bp || bp % DWORD != 0 || bp > hi - MIN_BLOCK_SIZE {
                violations.push(HeapViolation::LinkOutOfBounds { bp });
                break;
            }
            if block::is_allocated(region, bp) {
                violations.push(HeapViolation::NotFree { bp });
            }
            if self.flist.prev_of(region, bp) != came_from {
                violations.push(HeapViolation::LinkBroken { bp });
                break;
            }
            in_list += 1;
            came_from = bp;
            bp = self.flist.next_of(region, bp);
        }
        if in_list != physically_free {
            violations.push(HeapViolation::MembershipMismatch {
                in_list,
                physically_free,
            });
        }

        violations
    }

    /// Audits the heap and returns the number of violations (zero means
    /// consistent). With `verbose`, the block chain and each violation are
    /// dumped to stderr.
    pub fn check_heap(&self, verbose: bool) -> usize {
        let violations = self.audit();
        if verbose {
            eprintln!("{}", self.dump());
            for violation in &violations {
                eprintln!("violation: {violation}");
            }
        }
        violations.len()
    }

    /// Renders the physical block chain for debugging.
    pub fn dump(&self) -> String {
        use std::fmt::Write;

        let region = &self.region;
        let hi = region.hi();
        let mut out = String::new();
        let _ = writeln!(
            out,
            "heap [0, {hi:#x}) prologue={:#x} flist_head={:#x}",
            self.prologue,
            self.flist.head(),
        );
        let mut bp = self.prologue;
        for _ in 0..hi / MIN_BLOCK_SIZE + 2 {
            let header = region.read_word(block::header_off(bp));
            let size = block::word_size(header);
            if size == 0 {
                let _ = writeln!(out, "  {:#x}: epilogue", block::header_off(bp));
                break;
            }
            if block::word_alloc(header) {
                let _ = writeln!(out, "  {bp:#x}: size={size} allocated");
            } else {
                let _ = writeln!(
                    out,
                    "  {bp:#x}: size={size} free prev={:#x} next={:#x}",
                    self.flist.prev_of(region, bp),
                    self.flist.next_of(region, bp),
                );
            }
            match bp.checked_add(size) {
                Some(end) if end <= hi => bp = end,
                _ => {
                    let _ = writeln!(out, "  {bp:#x}: chain overruns the heap end");
                    break;
                }
            }
        }
        out
    }
}
