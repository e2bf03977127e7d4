//! Structured JSON logger for formwork
//!
//! Every event becomes a single JSON object on stderr; stdout is left
//! to command output. Lines are written synchronously.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

/// Log severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Cache hits and other per-read noise
    Trace = 0,
    Info = 1,
    /// Conflicts and forced changes
    Warn = 2,
    Error = 3,
    /// Storage loss; the caller must back off
    Fatal = 4,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Severity::Trace,
            1 => Severity::Info,
            2 => Severity::Warn,
            3 => Severity::Error,
            _ => Severity::Fatal,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Severity::Trace),
            "info" => Ok(Severity::Info),
            "warn" => Ok(Severity::Warn),
            "error" => Ok(Severity::Error),
            "fatal" => Ok(Severity::Fatal),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

static MIN_SEVERITY: AtomicU8 = AtomicU8::new(Severity::Info as u8);

/// Process-wide JSON-lines logger
pub struct Logger;

impl Logger {
    /// Set the process-wide minimum severity; lower events are dropped
    pub fn set_min_severity(severity: Severity) {
        MIN_SEVERITY.store(severity as u8, Ordering::Relaxed);
    }

    pub fn min_severity() -> Severity {
        Severity::from_u8(MIN_SEVERITY.load(Ordering::Relaxed))
    }

    pub fn log(severity: Severity, event: &str, fields: &[(&str, &str)]) {
        if severity < Self::min_severity() {
            return;
        }
        let line = render(severity, event, fields);
        let mut stderr = io::stderr().lock();
        // A failed write is dropped, never surfaced
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// One JSON object per line: `event`, then `severity`, then the fields by key.
///
/// A repeated key keeps its last value.
fn render(severity: Severity, event: &str, fields: &[(&str, &str)]) -> String {
    let fields: BTreeMap<&str, &str> = fields.iter().copied().collect();

    let mut line = format!("{{\"event\":{},\"severity\":\"{}\"", quote(event), severity);
    for (key, value) in fields {
        line.push(',');
        line.push_str(&quote(key));
        line.push(':');
        line.push_str(&quote(value));
    }
    line.push_str("}\n");
    line
}

fn quote(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}
