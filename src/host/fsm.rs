//! Task state machine and transition guards.
//!
//! Tasks move through `todo → doing → review → done` with `blocked` as a
//! side state reachable from anywhere. Guards attach preconditions to
//! specific transitions; effects describe metadata the Host API must apply
//! when the transition commits.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Task lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Not started.
    Todo,
    /// In progress.
    Doing,
    /// Awaiting review.
    Review,
    /// Finished.
    Done,
    /// Blocked on an external dependency.
    Blocked,
}

impl TaskState {
    /// String form stored in frontmatter.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::Doing => "doing",
            Self::Review => "review",
            Self::Done => "done",
            Self::Blocked => "blocked",
        }
    }

    /// Parse a frontmatter `status` value.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "todo" => Some(Self::Todo),
            "doing" => Some(Self::Doing),
            "review" => Some(Self::Review),
            "done" => Some(Self::Done),
            "blocked" => Some(Self::Blocked),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata effects the Host API applies when a transition commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionEffect {
    /// Stamp `done_ts` with the current time.
    SetDoneTs,
    /// Freeze the `estimate` field (further edits rejected).
    FreezeEstimate,
}

/// A rejected task transition.
#[derive(Debug, thiserror::Error)]
#[error("illegal task transition {from} -> {to}: {reason}")]
pub struct FsmViolation {
    /// State before.
    pub from: TaskState,
    /// Requested state.
    pub to: TaskState,
    /// Why the guard rejected it.
    pub reason: String,
}

/// Check a task transition against the FSM and its guards.
///
/// `metadata` is the post-merge metadata of the task (patch already applied),
/// so guards can see `assignee`, `start_ts`, `reopen_reason`, and
/// `blocked_reason` wherever the caller supplied them.
///
/// # Errors
///
/// Returns [`FsmViolation`] for transitions outside the FSM or with an
/// unsatisfied guard.
pub fn check_transition(
    from: TaskState,
    to: TaskState,
    metadata: &BTreeMap<String, Value>,
) -> Result<Vec<TransitionEffect>, FsmViolation> {
    use TaskState::{Blocked, Doing, Done, Review, Todo};

    if from == to {
        return Ok(Vec::new());
    }

    match (from, to) {
        (Todo, Doing) => {
            if has_nonempty(metadata, "assignee") || has_nonempty(metadata, "start_ts") {
                Ok(Vec::new())
            } else {
                Err(violation(from, to, "requires assignee or start_ts"))
            }
        }
        (Doing, Review) | (Review, Doing) => Ok(Vec::new()),
        (Doing, Done) | (Review, Done) => {
            Ok(vec![TransitionEffect::SetDoneTs, TransitionEffect::FreezeEstimate])
        }
        (Done, Doing) => {
            if has_nonempty(metadata, "reopen_reason") {
                Ok(Vec::new())
            } else {
                Err(violation(from, to, "requires non-empty reopen_reason"))
            }
        }
        (_, Blocked) => {
            if has_nonempty(metadata, "blocked_reason") {
                Ok(Vec::new())
            } else {
                Err(violation(from, to, "requires non-empty blocked_reason"))
            }
        }
        (Blocked, Todo) => Ok(Vec::new()),
        _ => Err(violation(from, to, "transition not permitted")),
    }
}

fn violation(from: TaskState, to: TaskState, reason: &str) -> FsmViolation {
    FsmViolation {
        from,
        to,
        reason: reason.to_owned(),
    }
}

fn has_nonempty(metadata: &BTreeMap<String, Value>, key: &str) -> bool {
    match metadata.get(key) {
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Null) | None => false,
        Some(_) => true,
    }
}
