//! End-to-end contract tests for the heap engine: payload isolation,
//! reallocation prefix preservation, free/allocate round trips, and a
//! deterministic randomized trace that audits the heap after every
//! operation.

use tagheap_core::{Heap, HeapConfig};

fn lcg(state: &mut u64) -> u64 {
    *state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
    *state
}

fn test_heap() -> Heap {
    Heap::new(HeapConfig::default().with_max_heap(1 << 20)).expect("init")
}

#[derive(Clone, Copy)]
struct Live {
    bp: usize,
    len: usize,
    fill: u8,
}

fn fill_payload(heap: &mut Heap, slot: &Live) {
    heap.payload_mut(slot.bp).expect("live payload")[..slot.len].fill(slot.fill);
}

fn assert_payload_intact(heap: &Heap, slot: &Live) {
    let payload = heap.payload(slot.bp).expect("live payload");
    assert!(
        payload[..slot.len].iter().all(|&b| b == slot.fill),
        "payload of block {:#x} corrupted",
        slot.bp
    );
}

#[test]
fn test_returned_pointers_are_aligned_and_interior() {
    let mut heap = test_heap();
    for size in [1, 15, 16, 17, 64, 333, 4096] {
        let bp = heap.allocate(size).expect("allocate");
        assert_eq!(bp % 16, 0);
        // Strictly between prologue and epilogue.
        assert!(bp >= 48);
        assert!(bp + heap.usable_size(bp).unwrap() <= heap.heap_size() - 8);
    }
    assert_eq!(heap.check_heap(false), 0);
}

#[test]
fn test_writing_one_payload_leaves_others_untouched() {
    let mut heap = test_heap();
    let slots: Vec<Live> = (0u8..8)
        .map(|i| {
            let len = 40 + usize::from(i) * 24;
            let bp = heap.allocate(len).expect("allocate");
            Live {
                bp,
                len,
                fill: 0x10 + i,
            }
        })
        .collect();
    for slot in &slots {
        fill_payload(&mut heap, slot);
    }

    // Saturate the middle block's full usable span, not just the requested
    // length, and confirm the neighbors don't move.
    let middle = slots[4];
    let usable = heap.usable_size(middle.bp).unwrap();
    heap.payload_mut(middle.bp).unwrap()[..usable].fill(0xEE);

    for (i, slot) in slots.iter().enumerate() {
        if i != 4 {
            assert_payload_intact(&heap, slot);
        }
    }
    assert_eq!(heap.check_heap(false), 0);
}

#[test]
fn test_free_then_allocate_round_trip_restores_live_set() {
    let mut heap = test_heap();
    let keepers: Vec<Live> = (0u8..4)
        .map(|i| {
            let len = 64;
            let bp = heap.allocate(len).expect("allocate");
            Live {
                bp,
                len,
                fill: 0xA0 + i,
            }
        })
        .collect();
    for slot in &keepers {
        fill_payload(&mut heap, slot);
    }
    let before = heap.active_count();

    let transient = heap.allocate(512).expect("allocate");
    heap.free(transient);

    assert_eq!(heap.active_count(), before);
    for slot in &keepers {
        assert_payload_intact(&heap, slot);
    }
    assert_eq!(heap.check_heap(false), 0);
}

#[test]
fn test_reallocate_preserves_prefix_across_moves() {
    let mut heap = test_heap();
    let mut bp = heap.allocate(96).expect("allocate");
    let original: Vec<u8> = (0..96u8).map(|i| i.wrapping_mul(37)).collect();
    heap.payload_mut(bp).unwrap()[..96].copy_from_slice(&original);

    // Grow through several doublings; each step must keep the old bytes.
    for size in [200, 500, 1200, 5000] {
        bp = heap.reallocate(bp, size).expect("reallocate");
        assert_eq!(&heap.payload(bp).unwrap()[..96], original.as_slice());
        assert_eq!(heap.check_heap(false), 0);
    }

    // Shrinking keeps the prefix that still fits.
    bp = heap.reallocate(bp, 48).expect("reallocate");
    assert_eq!(&heap.payload(bp).unwrap()[..48], &original[..48]);
    assert_eq!(heap.check_heap(false), 0);
}

#[test]
fn test_randomized_trace_preserves_invariants() {
    let mut heap = test_heap();
    let mut live: Vec<Live> = Vec::new();
    let mut rng = 0xA5A5_5A5A_DEAD_BEEFu64;

    for round in 0..1500 {
        let r = lcg(&mut rng);
        match r % 3 {
            0 => {
                let len = ((r >> 8) as usize % 2048).max(1);
                if let Some(bp) = heap.allocate(len) {
                    let slot = Live {
                        bp,
                        len,
                        fill: (r >> 24) as u8 | 1,
                    };
                    fill_payload(&mut heap, &slot);
                    live.push(slot);
                }
            }
            1 if !live.is_empty() => {
                let idx = (r as usize >> 2) % live.len();
                let slot = live.swap_remove(idx);
                assert_payload_intact(&heap, &slot);
                heap.free(slot.bp);
            }
            2 if !live.is_empty() => {
                let idx = (r as usize >> 2) % live.len();
                let new_len = (r >> 16) as usize % 2048;
                let old = live[idx];
                assert_payload_intact(&heap, &old);
                match heap.reallocate(old.bp, new_len) {
                    Some(bp) => {
                        let preserved = old.len.min(new_len);
                        let payload = heap.payload(bp).expect("live payload");
                        assert!(
                            payload[..preserved].iter().all(|&b| b == old.fill),
                            "reallocation lost the preserved prefix"
                        );
                        let slot = Live {
                            bp,
                            len: new_len,
                            fill: (r >> 32) as u8 | 1,
                        };
                        fill_payload(&mut heap, &slot);
                        live[idx] = slot;
                    }
                    None => {
                        if new_len == 0 {
                            // reallocate(bp, 0) behaves like free(bp).
                            live.swap_remove(idx);
                        }
                        // An out-of-memory move leaves the block intact.
                    }
                }
            }
            _ => {}
        }

        let violations = heap.check_heap(false);
        assert_eq!(violations, 0, "heap inconsistent after round {round}");
        for slot in &live {
            assert_payload_intact(&heap, slot);
        }
        assert_eq!(heap.active_count(), live.len());
    }

    for slot in live.drain(..) {
        heap.free(slot.bp);
    }
    assert_eq!(heap.active_count(), 0);
    assert_eq!(heap.check_heap(false), 0);
}

#[test]
fn test_trace_with_tiny_reservation_hits_oom_and_recovers() {
    let mut heap = Heap::new(
        HeapConfig::default()
            .with_max_heap(1 << 14)
            .with_chunk_size(1 << 10),
    )
    .expect("init");
    let mut live = Vec::new();
    let mut rng = 0x1234_5678_9ABC_DEF0u64;
    let mut saw_oom = false;

    for _ in 0..600 {
        let r = lcg(&mut rng);
        // Allocation-heavy mix so the reservation is guaranteed to run dry.
        if r % 4 < 3 {
            let len = ((r >> 8) as usize % 1024).max(1);
            match heap.allocate(len) {
                Some(bp) => live.push(bp),
                None => {
                    saw_oom = true;
                    if let Some(bp) = live.pop() {
                        heap.free(bp);
                    }
                }
            }
        } else if !live.is_empty() {
            let idx = (r as usize >> 2) % live.len();
            let bp = live.swap_remove(idx);
            heap.free(bp);
        }
        assert_eq!(heap.check_heap(false), 0);
    }
    assert!(saw_oom, "trace never exercised the out-of-memory path");
}
