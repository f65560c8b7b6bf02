#![no_main]
use libfuzzer_sys::fuzz_target;

use tagheap_core::{Heap, HeapConfig};

// Each 4-byte chunk is one operation: opcode, slot, 16-bit size.
fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }

    let Ok(mut heap) = Heap::new(
        HeapConfig::default()
            .with_max_heap(1 << 20)
            .with_chunk_size(1 << 10),
    ) else {
        return;
    };
    let mut slots: Vec<Option<usize>> = vec![None; 16];

    for chunk in data.chunks_exact(4) {
        let op = chunk[0] % 4;
        let slot = usize::from(chunk[1]) % slots.len();
        let size = usize::from(u16::from_le_bytes([chunk[2], chunk[3]]));

        match op {
            0 => {
                if let Some(bp) = slots[slot].take() {
                    heap.free(bp);
                }
                slots[slot] = heap.allocate(size);
            }
            1 => {
                if let Some(bp) = slots[slot].take() {
                    heap.free(bp);
                }
            }
            2 => {
                if let Some(bp) = slots[slot] {
                    match heap.reallocate(bp, size) {
                        Some(new_bp) => slots[slot] = Some(new_bp),
                        None if size == 0 => slots[slot] = None,
                        None => {}
                    }
                }
            }
            _ => {
                // Feed the sanity filter a raw offset; must never panic.
                heap.free(size);
            }
        }

        assert_eq!(heap.check_heap(false), 0, "heap invariant violated");
    }

    for bp in slots.into_iter().flatten() {
        heap.free(bp);
    }
    assert_eq!(heap.check_heap(false), 0, "heap inconsistent after teardown");
});
