//! Structured JSON logger
//!
//! One log line = one event. Fields are emitted in a fixed order (ts, event,
//! severity, then alphabetical) so log lines diff cleanly across runs.
//! Warnings and errors go to stderr; everything else to stdout.

use std::fmt;
use std::io::{self, Write};

use chrono::Utc;

/// Log severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Structured logger. All methods are associated functions; no global state
/// is held and lines are written with a single syscall.
pub struct Logger;

impl Logger {
    pub fn debug(event: &str, fields: &[(&str, &str)]) {
        Self::emit(Severity::Debug, event, fields, &mut io::stdout());
    }

    pub fn info(event: &str, fields: &[(&str, &str)]) {
        Self::emit(Severity::Info, event, fields, &mut io::stdout());
    }

    pub fn warn(event: &str, fields: &[(&str, &str)]) {
        Self::emit(Severity::Warn, event, fields, &mut io::stderr());
    }

    pub fn error(event: &str, fields: &[(&str, &str)]) {
        Self::emit(Severity::Error, event, fields, &mut io::stderr());
    }

    fn emit<W: Write>(severity: Severity, event: &str, fields: &[(&str, &str)], writer: &mut W) {
        let mut line = String::with_capacity(256);

        line.push_str("{\"ts\":\"");
        line.push_str(&Utc::now().to_rfc3339());
        line.push_str("\",\"event\":\"");
        escape_into(&mut line, event);
        line.push_str("\",\"severity\":\"");
        line.push_str(severity.as_str());
        line.push('"');

        let mut sorted: Vec<_> = fields.iter().collect();
        sorted.sort_by_key(|(k, _)| *k);

        for (key, value) in sorted {
            line.push_str(",\"");
            escape_into(&mut line, key);
            line.push_str("\":\"");
            escape_into(&mut line, value);
            line.push('"');
        }

        line.push_str("}\n");

        let _ = writer.write_all(line.as_bytes());
        let _ = writer.flush();
    }
}

fn escape_into(out: &mut String, s: &str) {
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
}

#[cfg(test)]
fn capture(severity: Severity, event: &str, fields: &[(&str, &str)]) -> String {
    let mut buffer = Vec::new();
    Logger::emit(severity, event, fields, &mut buffer);
    String::from_utf8(buffer).unwrap()
}
