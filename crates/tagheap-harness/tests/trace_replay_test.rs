//! Full harness runs: synthetic trace replay with heap auditing, plus
//! JSONL log emission and re-validation.

use tagheap_core::{Heap, HeapConfig};
use tagheap_harness::{
    LogEmitter, LogEntry, LogLevel, Outcome, run_trace, synthetic_trace, validate_log_line,
};
use tagheap_harness::structured_log::validate_log_file;

fn heap() -> Heap {
    Heap::new(HeapConfig::default().with_max_heap(1 << 21)).expect("init")
}

#[test]
fn test_replay_across_seeds_stays_consistent() {
    for seed in [1u64, 0xDEAD_BEEF, 0x0123_4567_89AB_CDEF] {
        let mut heap = heap();
        let ops = synthetic_trace(seed, 1200, 24, 1536);
        let report = run_trace(&mut heap, &ops).unwrap_or_else(|e| {
            panic!("seed {seed:#x}: {e}");
        });
        assert_eq!(report.violations, 0, "seed {seed:#x}");
        assert_eq!(report.ops_applied, 1200);
        assert!(report.utilization_permille <= 1000);
    }
}

#[test]
fn test_replay_under_memory_pressure_reports_failures_not_corruption() {
    let mut heap = Heap::new(
        HeapConfig::default()
            .with_max_heap(1 << 14)
            .with_chunk_size(1 << 10),
    )
    .expect("init");
    let ops = synthetic_trace(77, 900, 32, 2048);
    let report = run_trace(&mut heap, &ops).expect("pressure must fail allocations, not the heap");
    assert!(report.failed_allocs > 0);
    assert_eq!(report.violations, 0);
}

#[test]
fn test_run_log_round_trips_through_validation() {
    let mut heap = heap();
    let ops = synthetic_trace(5, 300, 8, 512);
    let report = run_trace(&mut heap, &ops).unwrap();

    let path = std::env::temp_dir().join("tagheap_trace_replay_test.jsonl");
    let mut emitter = LogEmitter::to_file(&path, "replay-test").unwrap();
    emitter.emit(LogLevel::Info, "replay_start").unwrap();
    emitter
        .emit_entry(
            LogEntry::new("", LogLevel::Info, "replay_done")
                .with_outcome(if report.violations == 0 {
                    Outcome::Pass
                } else {
                    Outcome::Fail
                })
                .with_heap_state(report.final_heap_size, report.utilization_permille)
                .with_details(serde_json::to_value(&report).unwrap()),
        )
        .unwrap();
    emitter.flush().unwrap();

    let entries = validate_log_file(&path).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].outcome, Some(Outcome::Pass));
    assert_eq!(entries[1].heap_size, Some(report.final_heap_size));
    std::fs::remove_file(&path).ok();
}

#[test]
fn test_validation_flags_tampered_line() {
    let entry = LogEntry::new("tagheap::x::1", LogLevel::Info, "ok");
    let line = entry.to_jsonl().unwrap();
    assert!(validate_log_line(&line, 1).is_ok());
    let tampered = line.replace("\"info\"", "\"shout\"");
    assert!(validate_log_line(&tampered, 1).is_err());
}
