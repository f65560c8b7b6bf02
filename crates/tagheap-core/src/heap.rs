//! The heap engine.
//!
//! Coordinates the region, the boundary-tag block layer, and the explicit
//! free list behind the public `allocate` / `free` / `reallocate` surface.
//! Placement is first-fit over the LIFO free list with splitting; growth goes
//! through `extend_heap`, and every block that turns free is immediately
//! coalesced with its free physical neighbors, so no two adjacent free
//! blocks ever exist between public calls.
//!
//! Block pointers handed to callers are offsets of the payload's first byte,
//! always 16-aligned, with the block header one word below. Offset 0 is
//! never handed out and acts as the null pointer.

use crate::block::{self, DWORD, MIN_BLOCK_SIZE, NIL, align16};
use crate::config::HeapConfig;
use crate::error::RegionError;
use crate::freelist::FreeList;
use crate::log::{HeapLogLevel, HeapLogRecord};
use crate::region::{Region, WORD};

/// Snapshot of the heap's accounting counters.
///
/// `free_blocks` / `free_bytes` are computed from the free list at snapshot
/// time; the rest are maintained incrementally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Current heap size in bytes, sentinels included.
    pub heap_size: usize,
    /// Live allocation count.
    pub active_count: usize,
    /// Payload capacity of live allocations, in bytes.
    pub live_bytes: usize,
    /// High-water mark of `live_bytes`.
    pub peak_live_bytes: usize,
    /// Blocks currently on the free list.
    pub free_blocks: usize,
    /// Total size of free blocks, tags included.
    pub free_bytes: usize,
    /// Number of `extend_heap` calls that succeeded.
    pub extend_count: u64,
    /// Number of splits performed by placement and reallocation.
    pub split_count: u64,
    /// Number of neighbor merges performed by coalescing.
    pub coalesce_count: u64,
}

/// A boundary-tag heap with an explicit free list.
///
/// Single-threaded by design; callers serialize access. The whole heap state
/// lives in this value, so the harness owns one instance per run.
pub struct Heap {
    pub(crate) region: Region,
    pub(crate) flist: FreeList,
    pub(crate) prologue: usize,
    config: HeapConfig,
    active_count: usize,
    live_bytes: usize,
    peak_live_bytes: usize,
    extend_count: u64,
    split_count: u64,
    coalesce_count: u64,
    next_decision_id: u64,
    lifecycle: Vec<HeapLogRecord>,
}

impl Heap {
    /// Builds the heap skeleton: alignment pad, allocated prologue anchoring
    /// the free list, and the zero-size allocated epilogue at the heap end.
    ///
    /// Fails only if the region provider refuses the initial request (or the
    /// pre-extension, when configured).
    pub fn new(config: HeapConfig) -> Result<Self, RegionError> {
        let mut region = Region::new(config.max_heap);
        region.request(3 * DWORD)?;

        region.write_word(0, 0);
        let prologue = DWORD;
        block::set_block(&mut region, prologue, MIN_BLOCK_SIZE, true);
        region.write_word(prologue, NIL as u64);
        region.write_word(prologue + WORD, NIL as u64);
        region.write_word(
            block::header_off(prologue + MIN_BLOCK_SIZE),
            block::pack(0, true),
        );

        let mut heap = Self {
            region,
            flist: FreeList::new(prologue),
            prologue,
            config,
            active_count: 0,
            live_bytes: 0,
            peak_live_bytes: 0,
            extend_count: 0,
            split_count: 0,
            coalesce_count: 0,
            next_decision_id: 1,
            lifecycle: Vec::new(),
        };
        if config.pre_extend {
            heap.extend_heap(config.chunk_size)?;
        }
        Ok(heap)
    }

    /// Allocates at least `size` usable bytes and returns the payload
    /// offset, or `None` on zero size or when growth fails.
    pub fn allocate(&mut self, size: usize) -> Option<usize> {
        if size == 0 {
            self.record(
                HeapLogLevel::Trace,
                "allocate",
                "zero_size",
                None,
                Some(0),
                "noop",
                "",
            );
            return None;
        }
        let adj = MIN_BLOCK_SIZE.max(align16(size + DWORD));
        let (bp, event) = match self.find_fit(adj) {
            Some(bp) => (bp, "fit_hit"),
            None => {
                let grow = adj.max(self.config.chunk_size);
                match self.extend_heap(grow) {
                    Ok(bp) => (bp, "fit_miss_extended"),
                    Err(err) => {
                        self.record(
                            HeapLogLevel::Warn,
                            "allocate",
                            "oom",
                            None,
                            Some(adj),
                            "oom",
                            err.to_string(),
                        );
                        return None;
                    }
                }
            }
        };
        self.place(bp, adj);
        self.record(
            HeapLogLevel::Trace,
            "allocate",
            event,
            Some(bp),
            Some(adj),
            "success",
            "",
        );
        Some(bp)
    }

    /// Allocates zeroed memory for `count` objects of `size` bytes each.
    ///
    /// Returns `None` if the multiplication overflows, the product is zero,
    /// or allocation fails.
    pub fn allocate_zeroed(&mut self, count: usize, size: usize) -> Option<usize> {
        let Some(total) = count.checked_mul(size) else {
            self.record(
                HeapLogLevel::Warn,
                "allocate_zeroed",
                "mul_overflow",
                None,
                None,
                "denied",
                format!("count={count} size={size}"),
            );
            return None;
        };
        let bp = self.allocate(total)?;
        let usable = block::block_size(&self.region, bp) - DWORD;
        self.region.fill(bp, usable, 0);
        Some(bp)
    }

    /// Releases a previously returned payload offset.
    ///
    /// Null is a no-op. A pointer that fails the sanity filter (unaligned,
    /// out of bounds, allocation bit clear, or header/footer disagree) is
    /// silently ignored; this catches double frees and garbage offsets on a
    /// best-effort basis.
    pub fn free(&mut self, bp: usize) {
        if bp == NIL {
            self.record(
                HeapLogLevel::Trace,
                "free",
                "free_null",
                None,
                None,
                "noop",
                "",
            );
            return;
        }
        if !self.valid_payload(bp) {
            self.record(
                HeapLogLevel::Warn,
                "free",
                "invalid_pointer",
                Some(bp),
                None,
                "ignored",
                "failed_header_footer_filter",
            );
            return;
        }
        let size = block::block_size(&self.region, bp);
        block::set_block(&mut self.region, bp, size, false);
        match self.active_count.checked_sub(1) {
            Some(next) => self.active_count = next,
            None => {
                self.active_count = 0;
                self.record(
                    HeapLogLevel::Error,
                    "free",
                    "active_count_underflow",
                    Some(bp),
                    Some(size),
                    "recovered",
                    "checked_sub_failed",
                );
            }
        }
        match self.live_bytes.checked_sub(size - DWORD) {
            Some(next) => self.live_bytes = next,
            None => {
                self.live_bytes = 0;
                self.record(
                    HeapLogLevel::Error,
                    "free",
                    "live_bytes_underflow",
                    Some(bp),
                    Some(size),
                    "recovered",
                    "checked_sub_failed",
                );
            }
        }
        let merged = self.coalesce(bp);
        self.record(
            HeapLogLevel::Trace,
            "free",
            "free",
            Some(bp),
            Some(size),
            "success",
            format!("merged_bp={merged:#x}"),
        );
    }

    /// Resizes the allocation at `bp` to at least `size` usable bytes.
    ///
    /// Null `bp` degrades to `allocate`; zero `size` degrades to `free` and
    /// returns `None`. Shrinks split in place; growth first tries to absorb
    /// a free physical successor, then falls back to allocate-copy-free. On
    /// failure the original allocation is left intact and `None` is
    /// returned. The first `min(old usable, new usable)` payload bytes are
    /// preserved.
    pub fn reallocate(&mut self, bp: usize, size: usize) -> Option<usize> {
        if bp == NIL {
            self.record(
                HeapLogLevel::Trace,
                "reallocate",
                "null_as_allocate",
                None,
                Some(size),
                "delegated",
                "",
            );
            return self.allocate(size);
        }
        if size == 0 {
            self.record(
                HeapLogLevel::Trace,
                "reallocate",
                "zero_as_free",
                Some(bp),
                Some(0),
                "freed",
                "",
            );
            self.free(bp);
            return None;
        }
        if !self.valid_payload(bp) {
            self.record(
                HeapLogLevel::Warn,
                "reallocate",
                "invalid_pointer",
                Some(bp),
                Some(size),
                "ignored",
                "failed_header_footer_filter",
            );
            return None;
        }

        let adj = MIN_BLOCK_SIZE.max(align16(size + DWORD));
        let old_size = block::block_size(&self.region, bp);

        if adj <= old_size {
            // Shrink or same size: split only when the cut-off tail is a
            // representable block.
            if old_size - adj >= MIN_BLOCK_SIZE {
                block::set_block(&mut self.region, bp, adj, true);
                let residue = block::next_bp(&self.region, bp);
                block::set_block(&mut self.region, residue, old_size - adj, false);
                self.live_bytes = self.live_bytes.saturating_sub(old_size - adj);
                self.split_count += 1;
                self.coalesce(residue);
                self.record(
                    HeapLogLevel::Trace,
                    "reallocate",
                    "shrink_split",
                    Some(bp),
                    Some(adj),
                    "success",
                    format!("old_size={old_size}"),
                );
            } else {
                self.record(
                    HeapLogLevel::Trace,
                    "reallocate",
                    "unchanged",
                    Some(bp),
                    Some(adj),
                    "success",
                    format!("old_size={old_size}"),
                );
            }
            return Some(bp);
        }

        let next = block::next_bp(&self.region, bp);
        if !block::is_allocated(&self.region, next) {
            let combined = old_size + block::block_size(&self.region, next);
            if combined >= adj {
                self.flist.remove(&mut self.region, next);
                if combined - adj >= MIN_BLOCK_SIZE {
                    block::set_block(&mut self.region, bp, adj, true);
                    let residue = block::next_bp(&self.region, bp);
                    block::set_block(&mut self.region, residue, combined - adj, false);
                    self.live_bytes += adj - old_size;
                    self.split_count += 1;
                    self.coalesce(residue);
                } else {
                    block::set_block(&mut self.region, bp, combined, true);
                    self.live_bytes += combined - old_size;
                }
                self.peak_live_bytes = self.peak_live_bytes.max(self.live_bytes);
                self.record(
                    HeapLogLevel::Debug,
                    "reallocate",
                    "expand_in_place",
                    Some(bp),
                    Some(adj),
                    "success",
                    format!("old_size={old_size} absorbed={next:#x}"),
                );
                return Some(bp);
            }
        }

        let Some(new_bp) = self.allocate(size) else {
            self.record(
                HeapLogLevel::Warn,
                "reallocate",
                "move_failed",
                Some(bp),
                Some(size),
                "oom",
                "original_left_intact",
            );
            return None;
        };
        let copy = (old_size - DWORD).min(block::block_size(&self.region, new_bp) - DWORD);
        self.region.copy_within(bp, new_bp, copy);
        self.free(bp);
        self.record(
            HeapLogLevel::Debug,
            "reallocate",
            "move",
            Some(new_bp),
            Some(size),
            "success",
            format!("from={bp:#x} copied={copy}"),
        );
        Some(new_bp)
    }

    /// Usable payload bytes of the live allocation at `bp`, or `None` if
    /// `bp` does not pass the payload filter.
    pub fn usable_size(&self, bp: usize) -> Option<usize> {
        self.valid_payload(bp)
            .then(|| block::block_size(&self.region, bp) - DWORD)
    }

    /// The payload bytes of the live allocation at `bp`.
    pub fn payload(&self, bp: usize) -> Option<&[u8]> {
        let len = self.usable_size(bp)?;
        Some(self.region.bytes(bp, len))
    }

    /// The payload bytes of the live allocation at `bp`, mutably.
    pub fn payload_mut(&mut self, bp: usize) -> Option<&mut [u8]> {
        let len = self.usable_size(bp)?;
        Some(self.region.bytes_mut(bp, len))
    }

    /// Current heap size in bytes.
    pub fn heap_size(&self) -> usize {
        self.region.hi()
    }

    /// Live allocation count.
    pub fn active_count(&self) -> usize {
        self.active_count
    }

    /// Payload capacity of live allocations.
    pub fn live_bytes(&self) -> usize {
        self.live_bytes
    }

    /// The configuration this heap was built with.
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// Accounting snapshot.
    pub fn stats(&self) -> HeapStats {
        let mut free_blocks = 0;
        let mut free_bytes = 0;
        let mut bp = self.flist.head();
        while bp != self.flist.prologue() && bp != NIL {
            free_blocks += 1;
            free_bytes += block::block_size(&self.region, bp);
            bp = self.flist.next_of(&self.region, bp);
        }
        HeapStats {
            heap_size: self.region.hi(),
            active_count: self.active_count,
            live_bytes: self.live_bytes,
            peak_live_bytes: self.peak_live_bytes,
            free_blocks,
            free_bytes,
            extend_count: self.extend_count,
            split_count: self.split_count,
            coalesce_count: self.coalesce_count,
        }
    }

    /// Returns a view of the lifecycle records.
    pub fn lifecycle_logs(&self) -> &[HeapLogRecord] {
        &self.lifecycle
    }

    /// Drains the lifecycle records.
    pub fn drain_lifecycle_logs(&mut self) -> Vec<HeapLogRecord> {
        std::mem::take(&mut self.lifecycle)
    }

    /// First-fit scan of the free list. The prologue terminates the walk.
    fn find_fit(&self, adj: usize) -> Option<usize> {
        let mut bp = self.flist.head();
        while bp != self.flist.prologue() && bp != NIL {
            if block::block_size(&self.region, bp) >= adj {
                return Some(bp);
            }
            bp = self.flist.next_of(&self.region, bp);
        }
        None
    }

    /// Transitions the free block at `bp` to allocated, splitting off a free
    /// residue when at least `MIN_BLOCK_SIZE` bytes remain.
    fn place(&mut self, bp: usize, adj: usize) {
        let total = block::block_size(&self.region, bp);
        debug_assert!(total >= adj);
        debug_assert!(!block::is_allocated(&self.region, bp));
        self.flist.remove(&mut self.region, bp);
        let placed = if total - adj >= MIN_BLOCK_SIZE {
            block::set_block(&mut self.region, bp, adj, true);
            let residue = block::next_bp(&self.region, bp);
            block::set_block(&mut self.region, residue, total - adj, false);
            self.split_count += 1;
            self.coalesce(residue);
            adj
        } else {
            block::set_block(&mut self.region, bp, total, true);
            total
        };
        self.active_count += 1;
        self.live_bytes += placed - DWORD;
        self.peak_live_bytes = self.peak_live_bytes.max(self.live_bytes);
    }

    /// Grows the heap by at least `bytes` (normalized to a multiple of 16,
    /// minimum one block). The old epilogue header becomes the new block's
    /// header and a fresh epilogue is written at the new end; the new block
    /// is coalesced with a free old tail and inserted into the free list.
    fn extend_heap(&mut self, bytes: usize) -> Result<usize, RegionError> {
        let size = align16(bytes).max(MIN_BLOCK_SIZE);
        let bp = self.region.request(size)?;
        block::set_block(&mut self.region, bp, size, false);
        self.region.write_word(
            block::header_off(block::next_bp(&self.region, bp)),
            block::pack(0, true),
        );
        self.extend_count += 1;
        self.record(
            HeapLogLevel::Debug,
            "extend_heap",
            "extend",
            Some(bp),
            Some(size),
            "success",
            "",
        );
        Ok(self.coalesce(bp))
    }

    /// Merges the free block at `bp` with free physical neighbors, then
    /// inserts the result into the free list. Returns the merged block.
    ///
    /// `bp` must carry free tags and must not be on the free list yet. The
    /// allocated sentinels guarantee both neighbor reads stay in bounds.
    fn coalesce(&mut self, bp: usize) -> usize {
        let prev = block::prev_bp(&self.region, bp);
        let next = block::next_bp(&self.region, bp);
        let prev_alloc = block::is_allocated(&self.region, prev);
        let next_alloc = block::is_allocated(&self.region, next);
        let mut bp = bp;
        let mut size = block::block_size(&self.region, bp);
        match (prev_alloc, next_alloc) {
            (true, true) => {}
            (true, false) => {
                self.flist.remove(&mut self.region, next);
                size += block::block_size(&self.region, next);
                block::set_block(&mut self.region, bp, size, false);
                self.coalesce_count += 1;
            }
            (false, true) => {
                self.flist.remove(&mut self.region, prev);
                size += block::block_size(&self.region, prev);
                bp = prev;
                block::set_block(&mut self.region, bp, size, false);
                self.coalesce_count += 1;
            }
            (false, false) => {
                self.flist.remove(&mut self.region, prev);
                self.flist.remove(&mut self.region, next);
                size += block::block_size(&self.region, prev)
                    + block::block_size(&self.region, next);
                bp = prev;
                block::set_block(&mut self.region, bp, size, false);
                self.coalesce_count += 2;
            }
        }
        self.flist.insert(&mut self.region, bp);
        bp
    }

    /// Best-effort filter for payload offsets arriving from the caller.
    ///
    /// Rejects offsets that are misaligned, outside the block area, or whose
    /// tags are not a consistent allocated header/footer pair. Required
    /// before the first header read so a garbage offset cannot index out of
    /// the region. Heuristic only: a corrupted heap can still fool it.
    pub(crate) fn valid_payload(&self, bp: usize) -> bool {
        let first = self.prologue + MIN_BLOCK_SIZE;
        if bp < first || bp % DWORD != 0 || bp > self.region.hi() - WORD {
            return false;
        }
        let hdr = self.region.read_word(block::header_off(bp));
        let size = block::word_size(hdr);
        if size < MIN_BLOCK_SIZE {
            return false;
        }
        let Some(end) = bp.checked_add(size) else {
            return false;
        };
        // The last real block's footer sits flush against the epilogue
        // header, so `end` may equal the brk but never pass it.
        if end > self.region.hi() {
            return false;
        }
        let ftr = self.region.read_word(bp + size - DWORD);
        block::word_alloc(hdr) && hdr == ftr
    }

    fn next_decision(&mut self) -> u64 {
        let id = self.next_decision_id;
        self.next_decision_id = self.next_decision_id.wrapping_add(1);
        id
    }

    fn record(
        &mut self,
        level: HeapLogLevel,
        op: &'static str,
        event: &'static str,
        bp: Option<usize>,
        size: Option<usize>,
        outcome: &'static str,
        details: impl Into<String>,
    ) {
        let decision_id = self.next_decision();
        let trace_id = format!("tagheap::{op}::{decision_id:016x}");
        self.lifecycle.push(HeapLogRecord {
            decision_id,
            trace_id,
            level,
            op,
            event,
            bp,
            size,
            outcome,
            details: details.into(),
            heap_size: self.region.hi(),
            active_count: self.active_count,
            live_bytes: self.live_bytes,
        });
    }
}

impl Default for Heap {
    /// A heap with default configuration. Panics only if the default
    /// reservation cannot hold the skeleton, which cannot happen.
    fn default() -> Self {
        match Self::new(HeapConfig::default()) {
            Ok(heap) => heap,
            Err(_) => unreachable!("default reservation holds the skeleton"),
        }
    }
}
