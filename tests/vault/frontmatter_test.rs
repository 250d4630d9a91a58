//! Canonical frontmatter codec tests.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use kira::vault::frontmatter::{parse, serialize, FrontmatterError};

fn sample_metadata() -> BTreeMap<String, Value> {
    let mut metadata = BTreeMap::new();
    metadata.insert("id".to_owned(), json!("task-20250301-0910-buy-milk"));
    metadata.insert("title".to_owned(), json!("Buy milk"));
    metadata.insert("status".to_owned(), json!("todo"));
    metadata.insert("tags".to_owned(), json!(["errand", "home"]));
    metadata.insert(
        "created_ts".to_owned(),
        json!("2025-03-01T09:10:00.000000+00:00"),
    );
    metadata
}

#[test]
fn serialize_produces_fenced_document_with_trailing_newline() {
    let out = serialize(&sample_metadata(), "Some body.\n");
    assert!(out.starts_with("---\n"));
    assert!(out.contains("\n---\n"));
    assert!(out.ends_with('\n'));
    assert!(!out.contains('\r'));
}

#[test]
fn serialize_sorts_keys_alphabetically() {
    let out = serialize(&sample_metadata(), "");
    let created = out.find("created_ts").expect("created_ts present");
    let id = out.find("id:").expect("id present");
    let status = out.find("status").expect("status present");
    let tags = out.find("tags").expect("tags present");
    let title = out.find("title").expect("title present");
    assert!(created < id && id < status && status < tags && tags < title);
}

#[test]
fn round_trip_is_byte_identical() {
    let metadata = sample_metadata();
    let body = "# Notes\n\nBuy the oat kind.\n";
    let first = serialize(&metadata, body);
    let (parsed_meta, parsed_body) = parse(&first).expect("parse serialized document");
    let second = serialize(&parsed_meta, &parsed_body);
    assert_eq!(first, second);
    assert_eq!(parsed_meta, metadata);
    assert_eq!(parsed_body, body);
}

#[test]
fn nested_mappings_round_trip() {
    let mut metadata = BTreeMap::new();
    metadata.insert("title".to_owned(), json!("n"));
    metadata.insert(
        "extra".to_owned(),
        json!({"z": 1, "a": {"inner": [1, 2, 3]}, "flag": true}),
    );
    let out = serialize(&metadata, "");
    let (parsed, _) = parse(&out).expect("parse");
    assert_eq!(parsed, metadata);
}

#[test]
fn parse_rejects_missing_opening_fence() {
    let err = parse("title: no fence\n").expect_err("must fail");
    assert!(matches!(err, FrontmatterError::MissingOpeningFence));
}

#[test]
fn parse_rejects_unterminated_block() {
    let err = parse("---\ntitle: x\n").expect_err("must fail");
    assert!(matches!(err, FrontmatterError::UnterminatedBlock));
}

#[test]
fn parse_rejects_non_mapping_frontmatter() {
    let err = parse("---\n- just\n- a\n- list\n---\nbody\n").expect_err("must fail");
    assert!(matches!(err, FrontmatterError::NotAMapping));
}

#[test]
fn parse_accepts_document_ending_at_fence() {
    let (metadata, body) = parse("---\ntitle: x\n---").expect("parse");
    assert_eq!(metadata.get("title"), Some(&json!("x")));
    assert!(body.is_empty());
}

#[test]
fn body_with_wikilinks_survives() {
    let mut metadata = BTreeMap::new();
    metadata.insert("title".to_owned(), json!("n"));
    let body = "See [[task-20250101-0000-other]] for details.\n";
    let out = serialize(&metadata, body);
    let (_, parsed_body) = parse(&out).expect("parse");
    assert_eq!(parsed_body, body);
}
