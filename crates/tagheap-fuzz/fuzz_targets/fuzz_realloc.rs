#![no_main]
use libfuzzer_sys::fuzz_target;

use tagheap_core::{Heap, HeapConfig};

// Hammer one allocation through a chain of reallocations, checking the
// preserved prefix at every step.
fuzz_target!(|data: &[u8]| {
    let Ok(mut heap) = Heap::new(
        HeapConfig::default()
            .with_max_heap(1 << 20)
            .with_chunk_size(1 << 10),
    ) else {
        return;
    };

    let Some(mut bp) = heap.allocate(64) else {
        return;
    };
    let mut len = 64usize;
    heap.payload_mut(bp).expect("live")[..len].fill(0xA7);

    for chunk in data.chunks_exact(2) {
        let new_len = usize::from(u16::from_le_bytes([chunk[0], chunk[1]]));
        match heap.reallocate(bp, new_len) {
            Some(new_bp) => {
                let preserved = len.min(new_len);
                let payload = heap.payload(new_bp).expect("live");
                assert!(
                    payload[..preserved].iter().all(|&b| b == 0xA7),
                    "reallocation lost the preserved prefix"
                );
                bp = new_bp;
                len = new_len;
                heap.payload_mut(bp).expect("live")[..len].fill(0xA7);
            }
            None if new_len == 0 => {
                // Freed; start over.
                let Some(fresh) = heap.allocate(64) else {
                    return;
                };
                bp = fresh;
                len = 64;
                heap.payload_mut(bp).expect("live")[..len].fill(0xA7);
            }
            None => {}
        }
        assert_eq!(heap.check_heap(false), 0, "heap invariant violated");
    }
});
