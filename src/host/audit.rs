//! Audit logger for vault mutations and tool invocations.
//!
//! Writes structured JSON entries, one per line, to date-named append-only
//! files under `<data>/audit/<date>.jsonl`. Secrets never reach the audit
//! log; entries carry only entity IDs, operation names, and trace IDs.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Utc;
use serde::Serialize;
use tracing::warn;

use crate::timeutil;

/// Audit event type discriminator.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// A vault entity was created.
    EntityCreated,
    /// A vault entity was updated.
    EntityUpdated,
    /// A vault entity was deleted.
    EntityDeleted,
    /// A registered tool was invoked.
    ToolInvoked,
    /// An error worth auditing occurred.
    Error,
}

/// A single structured audit entry.
#[derive(Debug, Serialize)]
struct AuditEntry<'a> {
    timestamp: String,
    trace_id: &'a str,
    event_type: AuditEventType,
    details: serde_json::Value,
}

enum Sink {
    /// Date-named files under a directory (production).
    Dir {
        dir: PathBuf,
        current: Option<(String, fs::File)>,
    },
    /// Arbitrary writer (testing).
    Writer(Box<dyn Write + Send>),
}

/// Audit logger writing structured JSON to an append-only sink.
pub struct AuditLogger {
    sink: Mutex<Sink>,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger").finish_non_exhaustive()
    }
}

impl AuditLogger {
    /// Create an audit logger appending to `<dir>/<date>.jsonl`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            sink: Mutex::new(Sink::Dir { dir, current: None }),
        })
    }

    /// Create an audit logger from an arbitrary writer (for testing).
    pub fn from_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            sink: Mutex::new(Sink::Writer(writer)),
        }
    }

    /// Record an audit event.
    ///
    /// Failures are logged and swallowed: audit must never take down a
    /// mutation that already committed.
    pub fn record(&self, event_type: AuditEventType, trace_id: &str, details: serde_json::Value) {
        let entry = AuditEntry {
            timestamp: timeutil::format_utc(Utc::now()),
            trace_id,
            event_type,
            details,
        };
        if let Err(e) = self.write_entry(&entry) {
            warn!(error = %e, "failed to write audit entry");
        }
    }

    fn write_entry(&self, entry: &AuditEntry<'_>) -> anyhow::Result<()> {
        let line = serde_json::to_string(entry)?;
        let mut sink = self.sink.lock().unwrap_or_else(|p| p.into_inner());
        match &mut *sink {
            Sink::Dir { dir, current } => {
                let today = Utc::now().format("%Y-%m-%d").to_string();
                let needs_rotate = current
                    .as_ref()
                    .map(|(date, _)| date != &today)
                    .unwrap_or(true);
                if needs_rotate {
                    let path = dir.join(format!("{today}.jsonl"));
                    let file = fs::OpenOptions::new().create(true).append(true).open(path)?;
                    *current = Some((today, file));
                }
                if let Some((_, file)) = current.as_mut() {
                    file.write_all(line.as_bytes())?;
                    file.write_all(b"\n")?;
                }
            }
            Sink::Writer(writer) => {
                writer.write_all(line.as_bytes())?;
                writer.write_all(b"\n")?;
            }
        }
        Ok(())
    }
}
