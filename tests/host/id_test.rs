//! Entity ID generation and validation tests.

use chrono::{TimeZone, Utc};

use kira::host::id::{generate, kind_of, slugify, valid_id};

#[test]
fn slugify_lowercases_and_collapses() {
    assert_eq!(slugify("Buy milk"), "buy-milk");
    assert_eq!(slugify("  Hello,   World!  "), "hello-world");
    assert_eq!(slugify("ALREADY-kebab"), "already-kebab");
}

#[test]
fn slugify_drops_non_ascii() {
    assert_eq!(slugify("Купить молоко"), "");
    assert_eq!(slugify("café ☕ time"), "caf-time");
}

#[test]
fn slugify_caps_length_at_fifty() {
    let long = "x".repeat(200);
    assert!(slugify(&long).len() <= 50);
}

#[test]
fn generated_id_is_valid_and_kind_prefixed() {
    let now = Utc.with_ymd_and_hms(2025, 3, 1, 9, 10, 0).single().expect("ts");
    let id = generate("task", "Buy milk", chrono_tz::UTC, now, |_| false);
    assert_eq!(id, "task-20250301-0910-buy-milk");
    assert!(valid_id(&id));
    assert_eq!(kind_of(&id), Some("task"));
}

#[test]
fn generation_uses_configured_timezone() {
    // 2025-03-01 02:30 UTC is 2025-02-28 21:30 in New York.
    let now = Utc.with_ymd_and_hms(2025, 3, 1, 2, 30, 0).single().expect("ts");
    let id = generate(
        "task",
        "x",
        chrono_tz::America::New_York,
        now,
        |_| false,
    );
    assert!(id.starts_with("task-20250228-2130-"));
}

#[test]
fn collision_appends_numeric_suffix() {
    let now = Utc.with_ymd_and_hms(2025, 3, 1, 9, 10, 0).single().expect("ts");
    let id = generate("task", "Buy milk", chrono_tz::UTC, now, |candidate| {
        candidate == "task-20250301-0910-buy-milk"
    });
    assert_eq!(id, "task-20250301-0910-buy-milk-2");
    assert!(valid_id(&id));
}

#[test]
fn empty_slug_falls_back_to_hex_token() {
    let now = Utc.with_ymd_and_hms(2025, 3, 1, 9, 10, 0).single().expect("ts");
    let id = generate("note", "☕☕☕", chrono_tz::UTC, now, |_| false);
    assert!(valid_id(&id));
    let slug = id.rsplit('-').next().expect("slug");
    assert_eq!(slug.len(), 8);
}

#[test]
fn valid_id_rejects_malformed() {
    assert!(!valid_id("task-2025031-0910-x")); // short date
    assert!(!valid_id("task-20250301-091-x")); // short time
    assert!(!valid_id("Task-20250301-0910-x")); // uppercase kind
    assert!(!valid_id("task-20250301-0910-")); // empty slug
    assert!(!valid_id("task-20250301-0910--x")); // double hyphen
    assert!(!valid_id("no-separator"));
}
