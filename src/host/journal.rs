//! Write-ahead link journal for crash recovery.
//!
//! Every mutating Host API operation appends a `begin` record to
//! `.kira/link_journal.jsonl` (fsynced) before touching the entity file, and
//! a `commit` record once the link graph has been updated. On startup,
//! `begin` records without a matching `commit` identify entities whose link
//! edges may be stale; the Host API recomputes them from the filesystem.

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::timeutil;

/// The mutation class a journal record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalOp {
    /// Entity created.
    Create,
    /// Entity metadata/content changed.
    Update,
    /// Entity removed.
    Delete,
}

/// Record phase: `begin` precedes the file write, `commit` follows the link
/// graph update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalPhase {
    /// Mutation is about to happen.
    Begin,
    /// Link graph reflects the mutation.
    Commit,
}

/// One JSONL journal record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalRecord {
    /// Correlates `begin` and `commit` lines.
    pub seq: String,
    /// Mutation class.
    pub op: JournalOp,
    /// Affected entity.
    pub entity_id: String,
    /// UTC timestamp.
    pub ts: String,
    /// Record phase.
    pub phase: JournalPhase,
}

/// Errors from journal operations.
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    /// Filesystem failure.
    #[error("journal I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A record failed to serialize.
    #[error("journal serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Append-only JSONL journal with fsync-before-write semantics.
pub struct LinkJournal {
    path: PathBuf,
    file: Mutex<fs::File>,
}

impl std::fmt::Debug for LinkJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkJournal")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl LinkJournal {
    /// Open (or create) the journal at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::Io`] if the file or its parent directory
    /// cannot be created.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, JournalError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = fs::OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Journal file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a `begin` record and fsync it. Returns the sequence token to
    /// pass to [`commit`](Self::commit).
    ///
    /// # Errors
    ///
    /// Returns [`JournalError`] on write or serialization failure.
    pub fn begin(&self, op: JournalOp, entity_id: &str) -> Result<String, JournalError> {
        let seq = uuid::Uuid::new_v4().simple().to_string();
        self.append(&JournalRecord {
            seq: seq.clone(),
            op,
            entity_id: entity_id.to_owned(),
            ts: timeutil::format_utc(Utc::now()),
            phase: JournalPhase::Begin,
        })?;
        Ok(seq)
    }

    /// Append the matching `commit` record and fsync it.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError`] on write or serialization failure.
    pub fn commit(&self, seq: &str, op: JournalOp, entity_id: &str) -> Result<(), JournalError> {
        self.append(&JournalRecord {
            seq: seq.to_owned(),
            op,
            entity_id: entity_id.to_owned(),
            ts: timeutil::format_utc(Utc::now()),
            phase: JournalPhase::Commit,
        })
    }

    fn append(&self, record: &JournalRecord) -> Result<(), JournalError> {
        let line = serde_json::to_string(record)?;
        let mut file = self.file.lock().unwrap_or_else(|p| p.into_inner());
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_data()?;
        Ok(())
    }

    /// Read the journal and return `begin` records that never committed.
    ///
    /// Malformed lines (e.g. a line torn by a crash mid-append) are skipped
    /// with a warning; they can only be the final line and carry no committed
    /// state.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::Io`] if the file cannot be read.
    pub fn unprocessed(&self) -> Result<Vec<JournalRecord>, JournalError> {
        let file = match fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut begun: Vec<JournalRecord> = Vec::new();
        let mut committed: std::collections::HashSet<String> = std::collections::HashSet::new();

        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: JournalRecord = match serde_json::from_str(&line) {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "skipping malformed journal line");
                    continue;
                }
            };
            match record.phase {
                JournalPhase::Begin => begun.push(record),
                JournalPhase::Commit => {
                    committed.insert(record.seq);
                }
            }
        }

        Ok(begun
            .into_iter()
            .filter(|r| !committed.contains(&r.seq))
            .collect())
    }

    /// Truncate the journal after successful replay.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::Io`] on filesystem failure.
    pub fn truncate(&self) -> Result<(), JournalError> {
        let mut file = self.file.lock().unwrap_or_else(|p| p.into_inner());
        *file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        // Reopen in append mode for subsequent records.
        *file = fs::OpenOptions::new().create(true).append(true).open(&self.path)?;
        Ok(())
    }
}
