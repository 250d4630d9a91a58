//! Per-kind metadata schema cache with file-system-based hot-reload.
//!
//! Schemas are JSON Schema documents in `.kira/schemas/<kind>.json`. A
//! [`notify`] watcher detects changes and reloads affected schemas
//! automatically. Kinds without a schema file get only the built-in
//! requirements (a non-empty string `title`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

/// Compiled validator plus the raw schema document.
struct CachedSchema {
    validator: Arc<jsonschema::Validator>,
}

/// Registry of per-kind metadata schemas, backed by JSON files on disk.
///
/// Supports hot-reload via a file system watcher: when a `.json` file is
/// created, modified, or deleted in the schemas directory, the cache updates
/// automatically.
pub struct SchemaCache {
    schemas: RwLock<HashMap<String, CachedSchema>>,
    schemas_dir: PathBuf,
    /// File watcher handle (kept alive to maintain notifications).
    _watcher: Option<RecommendedWatcher>,
}

impl std::fmt::Debug for SchemaCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.schemas.read().map(|s| s.len()).unwrap_or(0);
        f.debug_struct("SchemaCache")
            .field("schemas_dir", &self.schemas_dir)
            .field("schema_count", &count)
            .finish()
    }
}

impl SchemaCache {
    /// Create a cache, loading existing schemas and starting the watcher.
    ///
    /// # Errors
    ///
    /// Returns an error if the watcher cannot be initialized.
    pub fn new(schemas_dir: PathBuf) -> anyhow::Result<Arc<Self>> {
        let (tx, rx) = std::sync::mpsc::channel();

        let mut watcher =
            notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
                if let Ok(evt) = event {
                    for path in evt.paths {
                        if let Err(e) = tx.send(path) {
                            warn!(error = %e, "failed to send watcher event");
                        }
                    }
                }
            })?;

        if schemas_dir.is_dir() {
            watcher.watch(&schemas_dir, RecursiveMode::NonRecursive)?;
        }

        let cache = Arc::new(Self {
            schemas: RwLock::new(HashMap::new()),
            schemas_dir: schemas_dir.clone(),
            _watcher: Some(watcher),
        });

        cache.reload_all();

        let cache_for_thread = Arc::clone(&cache);
        std::thread::spawn(move || {
            while let Ok(path) = rx.recv() {
                if path.extension().and_then(|e| e.to_str()) == Some("json") {
                    let kind = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
                    debug!(kind, "reloading schema from watcher");
                    cache_for_thread.reload_kind(kind);
                }
            }
        });

        let count = cache.count();
        info!(count, dir = %schemas_dir.display(), "schema cache initialised");

        Ok(cache)
    }

    /// Create a cache without a file watcher (useful for testing).
    pub fn new_without_watcher(schemas_dir: PathBuf) -> Arc<Self> {
        let cache = Arc::new(Self {
            schemas: RwLock::new(HashMap::new()),
            schemas_dir,
            _watcher: None,
        });
        cache.reload_all();
        cache
    }

    /// Validate metadata for a kind against its schema.
    ///
    /// Built-in requirements always apply: `title` must be a non-empty
    /// string. When a schema file exists for the kind, the metadata must
    /// additionally satisfy it.
    ///
    /// Returns human-readable violation messages; empty means valid.
    pub fn validate(&self, kind: &str, metadata: &serde_json::Value) -> Vec<String> {
        let mut violations = Vec::new();

        let title_ok = metadata
            .get("title")
            .and_then(serde_json::Value::as_str)
            .map(|t| !t.trim().is_empty())
            .unwrap_or(false);
        if !title_ok {
            violations.push("title: required non-empty string".to_owned());
        }

        let schemas = match self.schemas.read() {
            Ok(s) => s,
            Err(_) => return violations,
        };
        if let Some(cached) = schemas.get(kind) {
            for error in cached.validator.iter_errors(metadata) {
                violations.push(format!("{}: {error}", error.instance_path()));
            }
        }

        violations
    }

    /// Whether a schema file is loaded for `kind`.
    pub fn has_schema(&self, kind: &str) -> bool {
        self.schemas
            .read()
            .map(|s| s.contains_key(kind))
            .unwrap_or(false)
    }

    /// Number of loaded schemas.
    pub fn count(&self) -> usize {
        self.schemas.read().map(|s| s.len()).unwrap_or(0)
    }

    /// Reload one kind's schema from disk; removes it if the file is gone.
    pub fn reload_kind(&self, kind: &str) {
        let path = self.schemas_dir.join(format!("{kind}.json"));
        if !path.exists() {
            if let Ok(mut map) = self.schemas.write() {
                map.remove(kind);
            }
            return;
        }
        match load_schema(&path) {
            Ok(cached) => {
                if let Ok(mut map) = self.schemas.write() {
                    map.insert(kind.to_owned(), cached);
                }
                debug!(kind, "schema reloaded");
            }
            Err(e) => warn!(kind, error = %e, "failed to reload schema"),
        }
    }

    /// Reload every `.json` schema in the directory, replacing the cache.
    pub fn reload_all(&self) {
        if !self.schemas_dir.is_dir() {
            return;
        }
        let entries = match std::fs::read_dir(&self.schemas_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "failed to read schemas directory");
                return;
            }
        };

        let mut loaded = HashMap::new();
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(kind) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match load_schema(&path) {
                Ok(cached) => {
                    loaded.insert(kind.to_owned(), cached);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping invalid schema");
                }
            }
        }

        if let Ok(mut map) = self.schemas.write() {
            *map = loaded;
        }
    }
}

/// Load and compile a schema document from a JSON file.
fn load_schema(path: &Path) -> anyhow::Result<CachedSchema> {
    let content = std::fs::read_to_string(path)?;
    let document: serde_json::Value = serde_json::from_str(&content)?;
    let validator = jsonschema::validator_for(&document)
        .map_err(|e| anyhow::anyhow!("schema compile error: {e}"))?;
    Ok(CachedSchema {
        validator: Arc::new(validator),
    })
}
