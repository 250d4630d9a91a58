//! Task state machine tests.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use kira::host::fsm::{check_transition, TaskState, TransitionEffect};

fn meta(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), v.clone()))
        .collect()
}

#[test]
fn todo_to_doing_requires_assignee_or_start_ts() {
    let err = check_transition(TaskState::Todo, TaskState::Doing, &meta(&[]))
        .expect_err("bare transition must fail");
    assert!(err.to_string().contains("assignee"));

    check_transition(
        TaskState::Todo,
        TaskState::Doing,
        &meta(&[("assignee", json!("irene"))]),
    )
    .expect("assignee satisfies guard");

    check_transition(
        TaskState::Todo,
        TaskState::Doing,
        &meta(&[("start_ts", json!("2025-03-01T09:00:00+00:00"))]),
    )
    .expect("start_ts satisfies guard");
}

#[test]
fn doing_to_done_sets_done_ts_and_freezes_estimate() {
    let effects = check_transition(TaskState::Doing, TaskState::Done, &meta(&[]))
        .expect("doing -> done is legal");
    assert!(effects.contains(&TransitionEffect::SetDoneTs));
    assert!(effects.contains(&TransitionEffect::FreezeEstimate));
}

#[test]
fn done_to_doing_requires_reopen_reason() {
    check_transition(TaskState::Done, TaskState::Doing, &meta(&[]))
        .expect_err("reopen without reason must fail");
    check_transition(
        TaskState::Done,
        TaskState::Doing,
        &meta(&[("reopen_reason", json!("missed a case"))]),
    )
    .expect("reason satisfies guard");

    // Whitespace-only reasons do not count.
    check_transition(
        TaskState::Done,
        TaskState::Doing,
        &meta(&[("reopen_reason", json!("   "))]),
    )
    .expect_err("blank reason must fail");
}

#[test]
fn any_to_blocked_requires_blocked_reason() {
    for from in [TaskState::Todo, TaskState::Doing, TaskState::Review, TaskState::Done] {
        check_transition(from, TaskState::Blocked, &meta(&[]))
            .expect_err("blocking without reason must fail");
        check_transition(
            from,
            TaskState::Blocked,
            &meta(&[("blocked_reason", json!("waiting on vendor"))]),
        )
        .expect("reason satisfies guard");
    }
}

#[test]
fn blocked_to_todo_is_always_allowed() {
    let effects =
        check_transition(TaskState::Blocked, TaskState::Todo, &meta(&[])).expect("legal");
    assert!(effects.is_empty());
}

#[test]
fn review_cycle_is_legal() {
    check_transition(TaskState::Doing, TaskState::Review, &meta(&[])).expect("doing -> review");
    check_transition(TaskState::Review, TaskState::Doing, &meta(&[])).expect("review -> doing");
    let effects =
        check_transition(TaskState::Review, TaskState::Done, &meta(&[])).expect("review -> done");
    assert!(effects.contains(&TransitionEffect::SetDoneTs));
}

#[test]
fn skipping_doing_is_illegal() {
    check_transition(TaskState::Todo, TaskState::Done, &meta(&[]))
        .expect_err("todo -> done must fail");
    check_transition(TaskState::Todo, TaskState::Review, &meta(&[]))
        .expect_err("todo -> review must fail");
}

#[test]
fn same_state_is_a_no_op() {
    let effects = check_transition(TaskState::Doing, TaskState::Doing, &meta(&[]))
        .expect("same state allowed");
    assert!(effects.is_empty());
}

#[test]
fn state_strings_round_trip() {
    for state in [
        TaskState::Todo,
        TaskState::Doing,
        TaskState::Review,
        TaskState::Done,
        TaskState::Blocked,
    ] {
        assert_eq!(TaskState::parse(state.as_str()), Some(state));
    }
    assert_eq!(TaskState::parse("cancelled"), None);
}
