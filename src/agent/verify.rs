//! Verify node: cheap post-execution sanity checks. No LLM call.
//!
//! Looks for results that violate structural invariants: malformed entity
//! IDs coming back from mutating tools, and the same ID reported as created
//! twice in one request. A violation sets the error; routing then gives the
//! planner a chance to react before the reply is produced.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::host::id;
use crate::tools::ToolResult;

use super::state::{AgentState, StateUpdate};

/// Tools whose successful results must carry a well-formed `id`.
const ID_BEARING_TOOLS: &[&str] = &["task_create", "task_update", "task_get", "note_create"];

/// Tools that create entities (duplicate-ID check).
const CREATING_TOOLS: &[&str] = &["task_create", "note_create", "rollup_daily"];

/// Run the verify node.
pub fn run(state: &AgentState) -> StateUpdate {
    if let Some(violation) = first_violation(&state.tool_results) {
        return StateUpdate::new().with_error(violation);
    }
    StateUpdate::new()
}

fn first_violation(results: &[ToolResult]) -> Option<String> {
    let mut created: BTreeSet<&str> = BTreeSet::new();

    for result in results.iter().filter(|r| !r.is_error()) {
        let reported_id = result.data.get("id").and_then(Value::as_str);

        if ID_BEARING_TOOLS.contains(&result.tool.as_str()) {
            if let Some(eid) = reported_id {
                if !id::valid_id(eid) {
                    return Some(format!(
                        "verification: {} returned malformed entity id {eid:?}",
                        result.tool
                    ));
                }
            }
        }

        if CREATING_TOOLS.contains(&result.tool.as_str()) {
            if let Some(eid) = reported_id {
                if !created.insert(eid) {
                    return Some(format!(
                        "verification: entity id {eid:?} reported as created twice"
                    ));
                }
            }
        }
    }

    None
}
