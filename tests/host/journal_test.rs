//! Write-ahead link journal tests.

use tempfile::TempDir;

use kira::host::journal::{JournalOp, LinkJournal};

#[test]
fn committed_entries_are_not_pending() {
    let dir = TempDir::new().expect("temp dir");
    let journal = LinkJournal::open(dir.path().join("journal.jsonl")).expect("open");

    let seq = journal
        .begin(JournalOp::Create, "task-20250301-0910-a")
        .expect("begin");
    journal
        .commit(&seq, JournalOp::Create, "task-20250301-0910-a")
        .expect("commit");

    assert!(journal.unprocessed().expect("scan").is_empty());
}

#[test]
fn uncommitted_entries_surface_on_replay() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("journal.jsonl");
    let journal = LinkJournal::open(&path).expect("open");

    let _committed = {
        let seq = journal
            .begin(JournalOp::Update, "task-20250301-0910-a")
            .expect("begin a");
        journal
            .commit(&seq, JournalOp::Update, "task-20250301-0910-a")
            .expect("commit a");
    };
    journal
        .begin(JournalOp::Delete, "task-20250301-0910-b")
        .expect("begin b, never committed");

    let pending = journal.unprocessed().expect("scan");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].entity_id, "task-20250301-0910-b");
    assert_eq!(pending[0].op, JournalOp::Delete);
}

#[test]
fn torn_trailing_line_is_skipped() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("journal.jsonl");
    let journal = LinkJournal::open(&path).expect("open");
    journal
        .begin(JournalOp::Create, "task-20250301-0910-a")
        .expect("begin");

    // Simulate a crash mid-append: garbage partial JSON at the tail.
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(&path)
        .expect("reopen");
    file.write_all(b"{\"seq\":\"tru").expect("torn write");

    let pending = journal.unprocessed().expect("scan survives torn line");
    assert_eq!(pending.len(), 1);
}

#[test]
fn truncate_resets_the_journal() {
    let dir = TempDir::new().expect("temp dir");
    let journal = LinkJournal::open(dir.path().join("journal.jsonl")).expect("open");
    journal
        .begin(JournalOp::Create, "task-20250301-0910-a")
        .expect("begin");

    journal.truncate().expect("truncate");
    assert!(journal.unprocessed().expect("scan").is_empty());

    // The journal stays usable after truncation.
    journal
        .begin(JournalOp::Create, "task-20250301-0910-b")
        .expect("begin after truncate");
    assert_eq!(journal.unprocessed().expect("scan").len(), 1);
}

#[test]
fn missing_file_yields_no_pending_entries() {
    let dir = TempDir::new().expect("temp dir");
    let journal = LinkJournal::open(dir.path().join("journal.jsonl")).expect("open");
    std::fs::remove_file(journal.path()).expect("remove");
    assert!(journal.unprocessed().expect("scan").is_empty());
}
