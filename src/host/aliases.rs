//! Old→new entity ID aliases from `.kira/aliases.json`.
//!
//! Migrations that rename entities leave a mapping behind so stale
//! references keep resolving. Aliases are consulted only after a direct
//! lookup misses; a live entity always shadows a stale alias.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::warn;

/// Loaded alias map, reloadable at runtime.
#[derive(Debug, Default)]
pub struct AliasMap {
    path: PathBuf,
    map: RwLock<HashMap<String, String>>,
}

impl AliasMap {
    /// Load aliases from `path`; a missing file yields an empty map.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let map = read_map(&path);
        Self {
            path,
            map: RwLock::new(map),
        }
    }

    /// Resolve an old ID to its current ID, following at most one hop.
    pub fn resolve(&self, old_id: &str) -> Option<String> {
        self.map
            .read()
            .ok()
            .and_then(|m| m.get(old_id).cloned())
    }

    /// Number of alias entries.
    pub fn len(&self) -> usize {
        self.map.read().map(|m| m.len()).unwrap_or(0)
    }

    /// Whether the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Re-read the alias file from disk.
    pub fn reload(&self) {
        let fresh = read_map(&self.path);
        if let Ok(mut map) = self.map.write() {
            *map = fresh;
        }
    }
}

fn read_map(path: &Path) -> HashMap<String, String> {
    match std::fs::read_to_string(path) {
        Ok(text) => match serde_json::from_str::<HashMap<String, String>>(&text) {
            Ok(map) => map,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "invalid aliases file, ignoring");
                HashMap::new()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read aliases file");
            HashMap::new()
        }
    }
}
