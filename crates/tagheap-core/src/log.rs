//! In-memory lifecycle records.
//!
//! Production paths never print; the heap instead appends structured records
//! to an in-memory buffer that callers can inspect or drain. Each record
//! snapshots the accounting counters at the time of the event, so a drained
//! log replays the heap's state evolution.

/// Severity of a lifecycle record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapLogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Structured heap lifecycle record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapLogRecord {
    /// Monotonic decision/event id.
    pub decision_id: u64,
    /// Correlation id for this record.
    pub trace_id: String,
    /// Severity level.
    pub level: HeapLogLevel,
    /// Public operation (`allocate`, `free`, `reallocate`, ...).
    pub op: &'static str,
    /// Event kind (`fit_hit`, `extend`, `invalid_pointer`, ...).
    pub event: &'static str,
    /// Block pointer involved in the event, if any.
    pub bp: Option<usize>,
    /// Size value involved in the event, if any.
    pub size: Option<usize>,
    /// Machine-readable outcome label.
    pub outcome: &'static str,
    /// Free-form details for debugging.
    pub details: String,
    /// Snapshot: current heap size in bytes.
    pub heap_size: usize,
    /// Snapshot: live allocation count.
    pub active_count: usize,
    /// Snapshot: live payload bytes.
    pub live_bytes: usize,
}
