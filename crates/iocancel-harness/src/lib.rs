//! # iocancel-harness
//!
//! Offline tooling around the structured logs written by the hook layer:
//! line-by-line schema validation and a per-event summary, plus a dump of
//! the configuration the environment resolves to.

use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};

use iocancel_core::config::{HookConfig, LogTarget};
use iocancel_core::log::{Outcome, validate_log_line};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{invalid} of {total} lines in {path} failed validation")]
    InvalidLog {
        path: PathBuf,
        invalid: usize,
        total: usize,
        problems: Vec<LineProblem>,
    },
}

/// One line that did not validate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineProblem {
    /// 1-based
    pub line: usize,
    pub field: String,
    pub message: String,
}

/// Summary of one JSONL log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LogReport {
    pub total: usize,
    pub valid: usize,
    pub problems: Vec<LineProblem>,
    /// Valid records per event name.
    pub events: BTreeMap<String, usize>,
    pub failures: usize,
    pub deferrals: usize,
    pub rollbacks: usize,
    /// Sum of handles visited over all cancellation broadcasts.
    pub handles_cancelled: usize,
}

impl LogReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Validate every non-blank line of a JSONL stream.
pub fn validate_log<R: BufRead>(reader: R) -> std::io::Result<LogReport> {
    let mut report = LogReport::default();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        report.total += 1;
        match validate_log_line(&line) {
            Ok(entry) => {
                report.valid += 1;
                match entry.outcome {
                    Some(Outcome::Failure) => report.failures += 1,
                    Some(Outcome::Deferred) => report.deferrals += 1,
                    Some(Outcome::RolledBack) => report.rollbacks += 1,
                    _ => {}
                }
                if entry.event == "cancel_broadcast" {
                    report.handles_cancelled += entry.handles.unwrap_or(0);
                }
                *report.events.entry(entry.event).or_default() += 1;
            }
            Err(err) => report.problems.push(LineProblem {
                line: index + 1,
                field: err.field,
                message: err.message,
            }),
        }
    }
    Ok(report)
}

/// Validate a log file; any invalid line is an error.
pub fn validate_log_file(path: &Path) -> Result<LogReport, HarnessError> {
    let file = std::fs::File::open(path).map_err(|source| HarnessError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let report =
        validate_log(std::io::BufReader::new(file)).map_err(|source| HarnessError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    if report.is_clean() {
        Ok(report)
    } else {
        Err(HarnessError::InvalidLog {
            path: path.to_path_buf(),
            invalid: report.problems.len(),
            total: report.total,
            problems: report.problems,
        })
    }
}

/// Configuration as JSON, for `harness config`.
#[must_use]
pub fn config_json(config: &HookConfig) -> serde_json::Value {
    let log = match &config.log {
        LogTarget::Off => serde_json::Value::from("off"),
        LogTarget::Stderr => serde_json::Value::from("stderr"),
        LogTarget::File(path) => serde_json::Value::from(path.display().to_string()),
    };
    serde_json::json!({
        "log": log,
        "log_level": config.log_level,
        "lazy_enabled": config.lazy_enabled,
    })
}
