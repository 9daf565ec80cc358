//! Structured JSONL logging for install, rollback and cancellation events.
//!
//! Provides:
//! - [`LogEntry`]: one JSONL record with required + optional fields.
//! - [`LogEmitter`]: writes records to a file, stderr, or a shared buffer.
//! - [`emit`]: process-wide sink configured from `IOCANCEL_LOG`.
//! - [`validate_log_line`]: checks a line against the record schema.
//!
//! Nothing in an interceptor stub logs; every emission point runs on an
//! install or cancellation path.

use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::{LogTarget, config};

// ---------------------------------------------------------------------------
// Log entry
// ---------------------------------------------------------------------------

/// Severity level for log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Parse from string (case-insensitive); unknown values fall back to `Info`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Self::Trace,
            "debug" => Self::Debug,
            "warn" | "warning" => Self::Warn,
            "error" => Self::Error,
            _ => Self::Info,
        }
    }
}

/// Result of the operation a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
    Deferred,
    RolledBack,
}

/// Canonical structured log entry.
///
/// Required fields: `timestamp`, `trace_id`, `level`, `event`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    // Required
    pub timestamp: String,
    pub trace_id: String,
    pub level: LogLevel,
    pub event: String,

    // Optional
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook_set: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    /// Registry entries visited by a cancellation broadcast.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handles: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
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
            hook_set: None,
            module: None,
            symbol: None,
            handles: None,
            outcome: None,
            details: None,
        }
    }

    #[must_use]
    pub fn with_hook_set(mut self, name: impl Into<String>) -> Self {
        self.hook_set = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    #[must_use]
    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    #[must_use]
    pub fn with_handles(mut self, handles: usize) -> Self {
        self.handles = Some(handles);
        self
    }

    #[must_use]
    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

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

// ---------------------------------------------------------------------------
// Log emitter
// ---------------------------------------------------------------------------

/// In-memory sink that stays readable after being handed to an emitter.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    /// Everything written so far, decoded lossily.
    #[must_use]
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Writes structured JSONL log entries.
pub struct LogEmitter {
    writer: Box<dyn Write + Send>,
    min_level: LogLevel,
    seq: u64,
    run_id: String,
}

impl LogEmitter {
    /// Create an emitter that appends to a file.
    pub fn to_file(path: &Path, min_level: LogLevel) -> std::io::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self::to_writer(Box::new(file), min_level))
    }

    /// Create an emitter that writes to stderr.
    #[must_use]
    pub fn to_stderr(min_level: LogLevel) -> Self {
        Self::to_writer(Box::new(std::io::stderr()), min_level)
    }

    /// Create an emitter over a [`SharedBuffer`] (for testing).
    #[must_use]
    pub fn to_buffer(min_level: LogLevel) -> (Self, SharedBuffer) {
        let buffer = SharedBuffer::default();
        (Self::to_writer(Box::new(buffer.clone()), min_level), buffer)
    }

    #[must_use]
    pub fn to_writer(writer: Box<dyn Write + Send>, min_level: LogLevel) -> Self {
        Self {
            writer,
            min_level,
            seq: 0,
            run_id: format!("iocancel::{}", std::process::id()),
        }
    }

    /// Whether records at `level` pass the filter.
    #[must_use]
    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.min_level
    }

    fn next_trace_id(&mut self) -> String {
        self.seq += 1;
        format!("{}::{:06}", self.run_id, self.seq)
    }

    /// Emit a fully-populated log entry, filling in a trace id when empty.
    /// Returns `Ok(false)` when the entry was filtered out.
    pub fn emit_entry(&mut self, mut entry: LogEntry) -> std::io::Result<bool> {
        if !self.enabled(entry.level) {
            return Ok(false);
        }
        if entry.trace_id.is_empty() {
            entry.trace_id = self.next_trace_id();
        }
        let line = entry.to_jsonl().map_err(std::io::Error::other)?;
        writeln!(self.writer, "{line}")?;
        self.writer.flush()?;
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Process-wide sink
// ---------------------------------------------------------------------------

static GLOBAL_EMITTER: OnceLock<Option<Mutex<LogEmitter>>> = OnceLock::new();
static DROPPED_RECORDS: AtomicU64 = AtomicU64::new(0);

fn global_emitter() -> Option<&'static Mutex<LogEmitter>> {
    GLOBAL_EMITTER
        .get_or_init(|| {
            let cfg = config();
            let emitter = match &cfg.log {
                LogTarget::Off => return None,
                LogTarget::Stderr => LogEmitter::to_stderr(cfg.log_level),
                LogTarget::File(path) => LogEmitter::to_file(path, cfg.log_level)
                    .unwrap_or_else(|_| LogEmitter::to_stderr(cfg.log_level)),
            };
            Some(Mutex::new(emitter))
        })
        .as_ref()
}

/// Start a record for the process-wide sink; the trace id is assigned on
/// emission.
#[must_use]
pub fn record(level: LogLevel, event: &str) -> LogEntry {
    LogEntry::new(String::new(), level, event)
}

/// Send `entry` to the process-wide sink. Logging never fails the caller;
/// write errors are only counted.
pub fn emit(entry: LogEntry) {
    let Some(emitter) = global_emitter() else {
        return;
    };
    if emitter.lock().emit_entry(entry).is_err() {
        DROPPED_RECORDS.fetch_add(1, Ordering::Relaxed);
    }
}

/// Whether the process-wide sink would keep a record at `level`.
#[must_use]
pub fn enabled(level: LogLevel) -> bool {
    global_emitter().is_some_and(|e| e.lock().enabled(level))
}

/// Records lost to write errors.
#[must_use]
pub fn dropped_records() -> u64 {
    DROPPED_RECORDS.load(Ordering::Relaxed)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validation error for a log line.
#[derive(Debug)]
pub struct LogValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for LogValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for LogValidationError {}

/// Parse one JSONL line and check the required fields.
pub fn validate_log_line(line: &str) -> Result<LogEntry, LogValidationError> {
    let entry: LogEntry = serde_json::from_str(line).map_err(|e| LogValidationError {
        field: "<line>".into(),
        message: e.to_string(),
    })?;
    if entry.trace_id.is_empty() {
        return Err(LogValidationError {
            field: "trace_id".into(),
            message: "must not be empty".into(),
        });
    }
    if entry.event.is_empty() {
        return Err(LogValidationError {
            field: "event".into(),
            message: "must not be empty".into(),
        });
    }
    if !looks_like_utc_timestamp(&entry.timestamp) {
        return Err(LogValidationError {
            field: "timestamp".into(),
            message: format!("not an RFC 3339 UTC timestamp: {}", entry.timestamp),
        });
    }
    Ok(entry)
}

fn looks_like_utc_timestamp(ts: &str) -> bool {
    let b = ts.as_bytes();
    b.len() == 24
        && b[4] == b'-'
        && b[7] == b'-'
        && b[10] == b'T'
        && b[13] == b':'
        && b[16] == b':'
        && b[19] == b'.'
        && b[23] == b'Z'
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn now_utc() -> String {
    let duration = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format_utc(duration.as_secs(), duration.subsec_millis())
}

/// Format seconds since the epoch as `YYYY-MM-DDTHH:MM:SS.mmmZ`.
fn format_utc(secs: u64, millis: u32) -> String {
    let days = (secs / 86_400) as i64;
    let rem = secs % 86_400;

    // Civil-from-days over 400-year eras.
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);

    format!(
        "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{millis:03}Z",
        rem / 3_600,
        (rem % 3_600) / 60,
        rem % 60,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_entry_serializes_required_fields() {
        let entry = LogEntry::new("iocancel::1::000001", LogLevel::Info, "install_start");
        let json = entry.to_jsonl().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(parsed["timestamp"].is_string());
        assert_eq!(parsed["trace_id"], "iocancel::1::000001");
        assert_eq!(parsed["level"], "info");
        assert_eq!(parsed["event"], "install_start");
        assert!(parsed.get("hook_set").is_none());
        assert!(parsed.get("outcome").is_none());
    }

    #[test]
    fn log_entry_with_optional_fields() {
        let entry = LogEntry::new("t", LogLevel::Warn, "rollback")
            .with_hook_set("primary")
            .with_module("libclntsh.so.12.1")
            .with_symbol("read")
            .with_handles(3)
            .with_outcome(Outcome::RolledBack)
            .with_details(serde_json::json!({"slots": 2}));
        let parsed: serde_json::Value = serde_json::from_str(&entry.to_jsonl().unwrap()).unwrap();
        assert_eq!(parsed["hook_set"], "primary");
        assert_eq!(parsed["module"], "libclntsh.so.12.1");
        assert_eq!(parsed["symbol"], "read");
        assert_eq!(parsed["handles"], 3);
        assert_eq!(parsed["outcome"], "rolled_back");
        assert_eq!(parsed["details"]["slots"], 2);
    }

    #[test]
    fn emitter_assigns_trace_ids_and_filters() {
        let (mut emitter, buffer) = LogEmitter::to_buffer(LogLevel::Info);
        assert!(!emitter.emit_entry(record(LogLevel::Debug, "lazy_deferred")).unwrap());
        assert!(emitter.emit_entry(record(LogLevel::Info, "install_start")).unwrap());
        assert!(emitter.emit_entry(record(LogLevel::Error, "install_failed")).unwrap());

        let output = buffer.contents();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);
        let first = validate_log_line(lines[0]).unwrap();
        let second = validate_log_line(lines[1]).unwrap();
        assert!(first.trace_id.ends_with("::000001"));
        assert!(second.trace_id.ends_with("::000002"));
        assert_eq!(second.level, LogLevel::Error);
    }

    #[test]
    fn validation_rejects_bad_lines() {
        assert!(validate_log_line("not json").is_err());
        let missing = r#"{"timestamp":"2024-01-01T00:00:00.000Z","trace_id":"","level":"info","event":"x"}"#;
        assert_eq!(validate_log_line(missing).unwrap_err().field, "trace_id");
        let bad_ts = r#"{"timestamp":"yesterday","trace_id":"t","level":"info","event":"x"}"#;
        assert_eq!(validate_log_line(bad_ts).unwrap_err().field, "timestamp");
    }

    #[test]
    fn utc_formatting_is_calendar_correct() {
        assert_eq!(format_utc(0, 0), "1970-01-01T00:00:00.000Z");
        // 2000-02-29 leap day
        assert_eq!(format_utc(951_782_400, 5), "2000-02-29T00:00:00.005Z");
        assert_eq!(format_utc(1_704_067_199, 999), "2023-12-31T23:59:59.999Z");
        assert!(looks_like_utc_timestamp(&now_utc()));
    }

    #[test]
    fn level_parsing_and_order() {
        assert_eq!(LogLevel::from_str_loose("DEBUG"), LogLevel::Debug);
        assert_eq!(LogLevel::from_str_loose("warning"), LogLevel::Warn);
        assert_eq!(LogLevel::from_str_loose("bogus"), LogLevel::Info);
        assert!(LogLevel::Error > LogLevel::Info);
    }
}
