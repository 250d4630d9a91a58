//! Per-kind schema cache tests.

use serde_json::json;
use tempfile::TempDir;

use kira::host::schema::SchemaCache;

#[test]
fn builtin_rules_apply_without_schema_files() {
    let dir = TempDir::new().expect("temp dir");
    let cache = SchemaCache::new_without_watcher(dir.path().join("schemas"));

    assert!(cache.validate("task", &json!({"title": "ok"})).is_empty());
    assert!(!cache.validate("task", &json!({})).is_empty());
    assert!(!cache.validate("task", &json!({"title": "   "})).is_empty());
    assert!(!cache.validate("task", &json!({"title": 42})).is_empty());
}

#[test]
fn schema_file_constrains_metadata() {
    let dir = TempDir::new().expect("temp dir");
    let schemas_dir = dir.path().join("schemas");
    std::fs::create_dir_all(&schemas_dir).expect("mkdir");
    std::fs::write(
        schemas_dir.join("task.json"),
        serde_json::to_string(&json!({
            "type": "object",
            "properties": {
                "title": {"type": "string"},
                "estimate": {"type": "string", "pattern": "^[0-9]+(h|m|d)$"}
            },
            "required": ["title"]
        }))
        .expect("schema json"),
    )
    .expect("write schema");

    let cache = SchemaCache::new_without_watcher(schemas_dir);
    assert!(cache.has_schema("task"));
    assert!(!cache.has_schema("note"));

    assert!(cache
        .validate("task", &json!({"title": "ok", "estimate": "2h"}))
        .is_empty());
    let violations = cache.validate("task", &json!({"title": "ok", "estimate": "soonish"}));
    assert!(!violations.is_empty());
}

#[test]
fn invalid_schema_files_are_skipped() {
    let dir = TempDir::new().expect("temp dir");
    let schemas_dir = dir.path().join("schemas");
    std::fs::create_dir_all(&schemas_dir).expect("mkdir");
    std::fs::write(schemas_dir.join("task.json"), "{ not json").expect("write garbage");

    let cache = SchemaCache::new_without_watcher(schemas_dir);
    assert_eq!(cache.count(), 0);
    // Built-in rules still apply.
    assert!(cache.validate("task", &json!({"title": "ok"})).is_empty());
}

#[test]
fn reload_kind_picks_up_new_file() {
    let dir = TempDir::new().expect("temp dir");
    let schemas_dir = dir.path().join("schemas");
    std::fs::create_dir_all(&schemas_dir).expect("mkdir");

    let cache = SchemaCache::new_without_watcher(schemas_dir.clone());
    assert!(!cache.has_schema("note"));

    std::fs::write(
        schemas_dir.join("note.json"),
        serde_json::to_string(&json!({"type": "object", "required": ["title"]}))
            .expect("schema json"),
    )
    .expect("write schema");
    cache.reload_kind("note");
    assert!(cache.has_schema("note"));

    std::fs::remove_file(schemas_dir.join("note.json")).expect("remove");
    cache.reload_kind("note");
    assert!(!cache.has_schema("note"));
}
