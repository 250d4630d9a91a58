//! Vault store: the only component that touches the filesystem for entity data.
//!
//! Entities live under `<vault>/<kind>s/<id>.md` as Markdown with YAML
//! frontmatter (see [`frontmatter`] for the canonical byte-exact format).
//! Writes are crash-safe: content goes to a sidecar `.tmp` file which is
//! fsynced and renamed over the target, then the parent directory is fsynced.
//! Either the old content or the new content is fully visible, never a torn
//! file.
//!
//! Per-entity advisory locks serialize writers within the process. The
//! concurrency model is single-process (multi-process vault writes are a
//! non-goal), so an in-process async lock registry is sufficient.

pub mod frontmatter;

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

pub use frontmatter::FrontmatterError;

/// Errors from vault store operations.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// Filesystem failure.
    #[error("vault I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Malformed entity file.
    #[error("parse error in {path}: {source}")]
    Parse {
        /// Offending file path.
        path: PathBuf,
        /// Underlying frontmatter error.
        #[source]
        source: FrontmatterError,
    },
    /// The `id` frontmatter key does not match the filename.
    #[error("id mismatch in {path}: frontmatter says {found:?}")]
    IdMismatch {
        /// Offending file path.
        path: PathBuf,
        /// The `id` value found in frontmatter.
        found: String,
    },
    /// A per-entity lock could not be acquired within the timeout.
    #[error("lock timeout for entity {entity_id}")]
    LockTimeout {
        /// Entity whose lock timed out.
        entity_id: String,
    },
}

/// A parsed entity file: frontmatter metadata plus Markdown body.
pub type Document = (BTreeMap<String, Value>, String);

/// Per-entity advisory lock registry.
///
/// Lock objects are created lazily per entity ID and retained for the process
/// lifetime. The map itself is guarded by a sync mutex (the critical section
/// never awaits).
#[derive(Default)]
struct EntityLocks {
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl EntityLocks {
    fn handle(&self, entity_id: &str) -> Arc<Mutex<()>> {
        let mut map = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        Arc::clone(
            map.entry(entity_id.to_owned())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }
}

/// File-backed entity store rooted at the vault directory.
pub struct VaultStore {
    root: PathBuf,
    locks: EntityLocks,
}

impl std::fmt::Debug for VaultStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultStore")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl VaultStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Io`] if the root cannot be created.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, VaultError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            locks: EntityLocks::default(),
        })
    }

    /// The vault root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path for an entity: `<root>/<kind>s/<id>.md`.
    pub fn entity_path(&self, kind_dir: &str, id: &str) -> PathBuf {
        self.root.join(kind_dir).join(format!("{id}.md"))
    }

    /// Acquire the advisory lock for one entity.
    ///
    /// Waits up to `timeout`; concurrent writers to *different* entities are
    /// unaffected.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::LockTimeout`] when the wait expires.
    pub async fn lock(
        &self,
        entity_id: &str,
        timeout: Duration,
    ) -> Result<OwnedMutexGuard<()>, VaultError> {
        let handle = self.locks.handle(entity_id);
        tokio::time::timeout(timeout, handle.lock_owned())
            .await
            .map_err(|_| VaultError::LockTimeout {
                entity_id: entity_id.to_owned(),
            })
    }

    /// Read and parse an entity file.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Io`] if the file cannot be read and
    /// [`VaultError::Parse`] for malformed content.
    pub fn read(&self, path: &Path) -> Result<Document, VaultError> {
        let text = fs::read_to_string(path)?;
        frontmatter::parse(&text).map_err(|source| VaultError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    /// Read an entity file and verify its `id` key matches the file stem.
    ///
    /// # Errors
    ///
    /// As [`read`](Self::read), plus [`VaultError::IdMismatch`] when the
    /// frontmatter `id` disagrees with the filename.
    pub fn read_checked(&self, path: &Path) -> Result<Document, VaultError> {
        let doc = self.read(path)?;
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        let found = doc
            .0
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if found != stem {
            return Err(VaultError::IdMismatch {
                path: path.to_owned(),
                found: found.to_owned(),
            });
        }
        Ok(doc)
    }

    /// Write an entity file atomically in canonical form.
    ///
    /// The serialized document goes to `<path>.tmp`, which is fsynced and
    /// renamed over `path`; the parent directory is fsynced afterwards so
    /// the rename itself is durable.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Io`] on any filesystem failure.
    pub fn write_atomic(
        &self,
        path: &Path,
        metadata: &BTreeMap<String, Value>,
        content: &str,
    ) -> Result<(), VaultError> {
        let serialized = frontmatter::serialize(metadata, content);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = tmp_path(path);
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(serialized.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        sync_parent_dir(path)?;

        debug!(path = %path.display(), bytes = serialized.len(), "entity written");
        Ok(())
    }

    /// Remove an entity file, fsyncing the parent directory afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Io`] on filesystem failure.
    pub fn remove(&self, path: &Path) -> Result<(), VaultError> {
        fs::remove_file(path)?;
        sync_parent_dir(path)?;
        debug!(path = %path.display(), "entity removed");
        Ok(())
    }

    /// Whether an entity file exists at the given path.
    pub fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    /// Lazily iterate the `.md` files of a kind directory.
    ///
    /// A missing directory yields an empty iterator (the kind simply has no
    /// entities yet). Unreadable directory entries are skipped with a warning.
    pub fn list(&self, kind_dir: &str) -> impl Iterator<Item = PathBuf> {
        let dir = self.root.join(kind_dir);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => Some(entries),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "failed to read kind directory");
                None
            }
        };

        entries
            .into_iter()
            .flatten()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("md"))
    }

    /// List the kind directories currently present in the vault.
    ///
    /// Hidden directories (`.kira` and friends) are excluded.
    pub fn kind_dirs(&self) -> Vec<String> {
        let mut dirs = Vec::new();
        let Ok(entries) = fs::read_dir(&self.root) else {
            return dirs;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            dirs.push(name.to_owned());
        }
        dirs.sort();
        dirs
    }
}

/// Sidecar temp path used by atomic writes: `<path>.tmp`.
fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".tmp");
    PathBuf::from(os)
}

/// Fsync a file's parent directory so renames and unlinks are durable.
fn sync_parent_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::File::open(parent)?.sync_all()?;
    }
    Ok(())
}
