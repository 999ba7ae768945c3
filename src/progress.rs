//! Refresh progress reporting.
//!
//! Reports observable progress during `hellorag build` so users see which
//! archives are being ingested, how many are left, and which were skipped.
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.

use std::io::{IsTerminal, Write};

/// A single progress event for a refresh.
#[derive(Clone, Debug)]
pub enum RefreshProgressEvent {
    /// Walking the base path for exports. Total unknown.
    Discovering { base_path: String },
    /// Archive `n` of `total` parsed and written.
    Ingesting {
        archive: String,
        n: u64,
        total: u64,
    },
    /// Archive `n` of `total` could not be ingested.
    Skipped {
        archive: String,
        reason: String,
        n: u64,
        total: u64,
    },
}

/// Reports refresh progress. Implementations write to stderr (human or JSON).
pub trait RefreshProgressReporter: Send + Sync {
    fn report(&self, event: RefreshProgressEvent);
}

/// Human-friendly progress on stderr: "build  ingesting  12 / 1,204  q1.zip".
pub struct StderrProgress;

impl RefreshProgressReporter for StderrProgress {
    fn report(&self, event: RefreshProgressEvent) {
        let line = match &event {
            RefreshProgressEvent::Discovering { base_path } => {
                format!("build  discovering exports in {}...\n", base_path)
            }
            RefreshProgressEvent::Ingesting { archive, n, total } => format!(
                "build  ingesting  {} / {}  {}\n",
                format_number(*n),
                format_number(*total),
                archive
            ),
            RefreshProgressEvent::Skipped {
                archive,
                reason,
                n,
                total,
            } => format!(
                "build  skipped    {} / {}  {}: {}\n",
                format_number(*n),
                format_number(*total),
                archive,
                reason
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl RefreshProgressReporter for JsonProgress {
    fn report(&self, event: RefreshProgressEvent) {
        let obj = match &event {
            RefreshProgressEvent::Discovering { base_path } => serde_json::json!({
                "event": "progress",
                "phase": "discovering",
                "base_path": base_path,
            }),
            RefreshProgressEvent::Ingesting { archive, n, total } => serde_json::json!({
                "event": "progress",
                "phase": "ingesting",
                "archive": archive,
                "n": n,
                "total": total,
            }),
            RefreshProgressEvent::Skipped {
                archive,
                reason,
                n,
                total,
            } => serde_json::json!({
                "event": "progress",
                "phase": "skipped",
                "archive": archive,
                "reason": reason,
                "n": n,
                "total": total,
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl RefreshProgressReporter for NoProgress {
    fn report(&self, _event: RefreshProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if std::io::stderr().is_terminal() {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "off" | "none" => Some(ProgressMode::Off),
            "human" => Some(ProgressMode::Human),
            "json" => Some(ProgressMode::Json),
            _ => None,
        }
    }

    pub fn reporter(&self) -> Box<dyn RefreshProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn parse_modes() {
        assert_eq!(ProgressMode::parse("json"), Some(ProgressMode::Json));
        assert_eq!(ProgressMode::parse("none"), Some(ProgressMode::Off));
        assert_eq!(ProgressMode::parse("loud"), None);
    }
}
