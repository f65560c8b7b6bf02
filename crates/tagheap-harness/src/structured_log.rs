//! Structured JSONL logging for harness runs.
//!
//! Provides:
//! - [`LogEntry`]: canonical JSONL record with required + optional fields.
//! - [`LogEmitter`]: writes JSONL lines to a file or an in-memory buffer.
//! - [`validate_log_line`] / [`validate_log_file`]: schema validation for
//!   emitted logs.

use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Severity level for log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Replay outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Pass,
    Fail,
    Error,
}

/// Canonical structured log entry.
///
/// Required fields: `timestamp`, `trace_id`, `level`, `event`. The optional
/// fields carry allocator context for trace-replay workflows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    // Required
    pub timestamp: String,
    pub trace_id: String,
    pub level: LogLevel,
    pub event: String,

    // Optional
    #[serde(skip_serializing_if = "Option::is_none")]
    pub op: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heap_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utilization_permille: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl LogEntry {
    /// Create a new log entry with required fields only.
    #[must_use]
    pub fn new(trace_id: impl Into<String>, level: LogLevel, event: impl Into<String>) -> Self {
        Self {
            timestamp: now_utc(),
            trace_id: trace_id.into(),
            level,
            event: event.into(),
            op: None,
            slot: None,
            size: None,
            outcome: None,
            heap_size: None,
            utilization_permille: None,
            details: None,
        }
    }

    /// Set the operation and its slot.
    #[must_use]
    pub fn with_op(mut self, op: impl Into<String>, slot: usize) -> Self {
        self.op = Some(op.into());
        self.slot = Some(slot);
        self
    }

    /// Set the size.
    #[must_use]
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    /// Set the outcome.
    #[must_use]
    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    /// Set the heap size and utilization snapshot.
    #[must_use]
    pub fn with_heap_state(mut self, heap_size: usize, utilization_permille: u16) -> Self {
        self.heap_size = Some(heap_size);
        self.utilization_permille = Some(utilization_permille);
        self
    }

    /// Set free-form details.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Serialize to a single JSONL line (no trailing newline).
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Writes structured JSONL log entries to a file or an in-memory buffer.
pub struct LogEmitter {
    writer: Box<dyn Write>,
    seq: u64,
    run_id: String,
}

impl LogEmitter {
    /// Create an emitter that writes to a file.
    pub fn to_file(path: &Path, run_id: &str) -> std::io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self {
            writer: Box::new(std::io::BufWriter::new(file)),
            seq: 0,
            run_id: run_id.to_string(),
        })
    }

    /// Create an emitter that writes to a buffer (for testing).
    #[must_use]
    pub fn to_buffer(run_id: &str) -> Self {
        Self {
            writer: Box::new(Vec::new()),
            seq: 0,
            run_id: run_id.to_string(),
        }
    }

    fn next_trace_id(&mut self) -> String {
        self.seq += 1;
        format!("tagheap::{}::{:06}", self.run_id, self.seq)
    }

    /// Emit a log entry with an auto-generated trace id.
    pub fn emit(&mut self, level: LogLevel, event: &str) -> std::io::Result<LogEntry> {
        let trace_id = self.next_trace_id();
        let entry = LogEntry::new(trace_id, level, event);
        let line = serde_json::to_string(&entry).map_err(std::io::Error::other)?;
        writeln!(self.writer, "{line}")?;
        Ok(entry)
    }

    /// Emit a fully-populated log entry, filling the trace id if empty.
    pub fn emit_entry(&mut self, mut entry: LogEntry) -> std::io::Result<()> {
        if entry.trace_id.is_empty() {
            entry.trace_id = self.next_trace_id();
        }
        let line = serde_json::to_string(&entry).map_err(std::io::Error::other)?;
        writeln!(self.writer, "{line}")
    }

    /// Flush the underlying writer.
    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

/// Validation error for a log line.
#[derive(Debug)]
pub struct LogValidationError {
    pub line_number: usize,
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for LogValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "line {}: field '{}': {}",
            self.line_number, self.field, self.message
        )
    }
}

/// Validate a single JSONL line against the schema.
pub fn validate_log_line(
    line: &str,
    line_number: usize,
) -> Result<LogEntry, Vec<LogValidationError>> {
    let mut errors = Vec::new();

    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            errors.push(LogValidationError {
                line_number,
                field: "<json>".to_string(),
                message: format!("invalid JSON: {e}"),
            });
            return Err(errors);
        }
    };

    let Some(obj) = value.as_object() else {
        errors.push(LogValidationError {
            line_number,
            field: "<root>".to_string(),
            message: "expected JSON object".to_string(),
        });
        return Err(errors);
    };

    for field in ["timestamp", "trace_id", "level", "event"] {
        if !obj.contains_key(field) {
            errors.push(LogValidationError {
                line_number,
                field: field.to_string(),
                message: "required field missing".to_string(),
            });
        }
    }

    if let Some(level) = obj.get("level").and_then(|v| v.as_str())
        && !["trace", "debug", "info", "warn", "error"].contains(&level)
    {
        errors.push(LogValidationError {
            line_number,
            field: "level".to_string(),
            message: format!("invalid level: '{level}'"),
        });
    }

    if let Some(outcome) = obj.get("outcome").and_then(|v| v.as_str())
        && !["pass", "fail", "error"].contains(&outcome)
    {
        errors.push(LogValidationError {
            line_number,
            field: "outcome".to_string(),
            message: format!("invalid outcome: '{outcome}'"),
        });
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    match serde_json::from_value::<LogEntry>(value) {
        Ok(entry) => Ok(entry),
        Err(e) => {
            errors.push(LogValidationError {
                line_number,
                field: "<schema>".to_string(),
                message: format!("deserialization failed: {e}"),
            });
            Err(errors)
        }
    }
}

/// Validate an entire JSONL file; returns the parsed entries.
pub fn validate_log_file(path: &Path) -> Result<Vec<LogEntry>, Vec<LogValidationError>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            return Err(vec![LogValidationError {
                line_number: 0,
                field: "<file>".to_string(),
                message: format!("cannot read: {e}"),
            }]);
        }
    };

    let mut entries = Vec::new();
    let mut errors = Vec::new();
    for (i, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match validate_log_line(line, i + 1) {
            Ok(entry) => entries.push(entry),
            Err(mut errs) => errors.append(&mut errs),
        }
    }

    if errors.is_empty() { Ok(entries) } else { Err(errors) }
}

fn now_utc() -> String {
    let duration = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format_utc(duration.as_secs(), duration.subsec_millis())
}

/// Formats seconds-since-epoch as an RFC 3339 UTC timestamp, using the
/// civil-from-days conversion over 400-year Gregorian eras.
fn format_utc(secs: u64, millis: u32) -> String {
    let tod = secs % 86_400;
    let z = (secs / 86_400) as i64 + 719_468;
    let era = z.div_euclid(146_097);
    let day_of_era = z.rem_euclid(146_097);
    let year_of_era =
        (day_of_era - day_of_era / 1_460 + day_of_era / 36_524 - day_of_era / 146_096) / 365;
    let day_of_year = day_of_era - (365 * year_of_era + year_of_era / 4 - year_of_era / 100);
    // Months counted from March, so leap days fall at the end of the cycle.
    let month_from_march = (5 * day_of_year + 2) / 153;
    let day = day_of_year - (153 * month_from_march + 2) / 5 + 1;
    let month = if month_from_march < 10 {
        month_from_march + 3
    } else {
        month_from_march - 9
    };
    let year = year_of_era + era * 400 + i64::from(month <= 2);
    format!(
        "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{millis:03}Z",
        tod / 3_600,
        (tod % 3_600) / 60,
        tod % 60,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_serializes_required_fields() {
        let entry = LogEntry::new("tagheap::run-1::000001", LogLevel::Info, "replay_start");
        let json = entry.to_jsonl().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(parsed["timestamp"].is_string());
        assert_eq!(parsed["trace_id"], "tagheap::run-1::000001");
        assert_eq!(parsed["level"], "info");
        assert_eq!(parsed["event"], "replay_start");
        assert!(parsed.get("op").is_none());
    }

    #[test]
    fn test_builder_fields_round_trip() {
        let entry = LogEntry::new("t", LogLevel::Debug, "op_applied")
            .with_op("alloc", 3)
            .with_size(256)
            .with_outcome(Outcome::Pass)
            .with_heap_state(8192, 400);
        let line = entry.to_jsonl().unwrap();
        let back = validate_log_line(&line, 1).unwrap();
        assert_eq!(back.op.as_deref(), Some("alloc"));
        assert_eq!(back.slot, Some(3));
        assert_eq!(back.size, Some(256));
        assert_eq!(back.outcome, Some(Outcome::Pass));
        assert_eq!(back.heap_size, Some(8192));
        assert_eq!(back.utilization_permille, Some(400));
    }

    #[test]
    fn test_emitter_assigns_sequential_trace_ids() {
        let mut emitter = LogEmitter::to_buffer("run-7");
        let a = emitter.emit(LogLevel::Info, "first").unwrap();
        let b = emitter.emit(LogLevel::Info, "second").unwrap();
        assert_eq!(a.trace_id, "tagheap::run-7::000001");
        assert_eq!(b.trace_id, "tagheap::run-7::000002");
    }

    #[test]
    fn test_validate_rejects_bad_json() {
        assert!(validate_log_line("{not json", 1).is_err());
        assert!(validate_log_line("42", 2).is_err());
    }

    #[test]
    fn test_validate_reports_missing_required_fields() {
        let errs = validate_log_line(r#"{"level":"info"}"#, 3).unwrap_err();
        let fields: Vec<&str> = errs.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"timestamp"));
        assert!(fields.contains(&"trace_id"));
        assert!(fields.contains(&"event"));
    }

    #[test]
    fn test_validate_rejects_unknown_level() {
        let line = r#"{"timestamp":"t","trace_id":"x","level":"loud","event":"e"}"#;
        let errs = validate_log_line(line, 1).unwrap_err();
        assert!(errs.iter().any(|e| e.field == "level"));
    }

    #[test]
    fn test_format_utc_epoch() {
        assert_eq!(format_utc(0, 0), "1970-01-01T00:00:00.000Z");
    }

    #[test]
    fn test_format_utc_handles_leap_day_and_year_end() {
        // 2000-02-29 00:00:00 UTC.
        assert_eq!(format_utc(951_782_400, 1), "2000-02-29T00:00:00.001Z");
        // 2024-12-31 23:59:59 UTC.
        assert_eq!(format_utc(1_735_689_599, 999), "2024-12-31T23:59:59.999Z");
    }
}
