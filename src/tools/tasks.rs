//! Task tools: list, get, create, update, delete.
//!
//! Each tool wraps Host API calls; errors surface as `ToolResult` errors,
//! never as panics or raised exceptions past the tool node.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::host::fsm::TaskState;
use crate::host::{EntityFilter, EntityKind, EntityPatch, HostApi};

use super::{optional_str, required_str, Tool, ToolResult};

/// Metadata keys accepted by task create/update argument objects.
const TASK_FIELDS: &[&str] = &[
    "status",
    "assignee",
    "start_ts",
    "done_ts",
    "estimate",
    "reopen_reason",
    "blocked_reason",
    "tags",
    "links",
];

/// Compact wire form of a task for LLM consumption.
fn task_summary(entity: &crate::host::Entity) -> Value {
    json!({
        "id": entity.id,
        "title": entity.title(),
        "status": entity.metadata.get("status").cloned().unwrap_or(Value::Null),
        "assignee": entity.metadata.get("assignee").cloned().unwrap_or(Value::Null),
        "tags": entity.metadata.get("tags").cloned().unwrap_or_else(|| json!([])),
        "updated_ts": entity.metadata.get("updated_ts").cloned().unwrap_or(Value::Null),
    })
}

fn collect_task_metadata(args: &Value) -> BTreeMap<String, Value> {
    let mut metadata = BTreeMap::new();
    if let Some(title) = optional_str(args, "title") {
        metadata.insert("title".to_owned(), json!(title));
    }
    for key in TASK_FIELDS {
        if let Some(value) = args.get(*key) {
            if !value.is_null() {
                metadata.insert((*key).to_owned(), value.clone());
            }
        }
    }
    metadata
}

// ---------------------------------------------------------------------------
// task_list
// ---------------------------------------------------------------------------

/// List tasks with optional status/tag/title filters.
pub struct TaskListTool {
    host: Arc<HostApi>,
}

impl TaskListTool {
    /// Wrap the Host API.
    pub fn new(host: Arc<HostApi>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl Tool for TaskListTool {
    fn name(&self) -> &str {
        "task_list"
    }

    fn description(&self) -> &str {
        "List tasks in the vault, optionally filtered by status, tag, or a title substring."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "status": {
                    "type": "string",
                    "enum": ["todo", "doing", "review", "done", "blocked"],
                    "description": "Keep only tasks in this state."
                },
                "tag": {"type": "string", "description": "Keep only tasks carrying this tag."},
                "title_contains": {"type": "string", "description": "Case-insensitive title substring."}
            },
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: &Value, _dry_run: bool) -> ToolResult {
        let filter = EntityFilter {
            state: optional_str(args, "status").and_then(TaskState::parse),
            tag: optional_str(args, "tag").map(ToOwned::to_owned),
            title_contains: optional_str(args, "title_contains").map(ToOwned::to_owned),
        };
        let tasks: Vec<Value> = self
            .host
            .list_entities(&EntityKind::Task, &filter)
            .map(|entity| task_summary(&entity))
            .collect();
        ToolResult::ok(self.name(), json!({"count": tasks.len(), "tasks": tasks}))
    }
}

// ---------------------------------------------------------------------------
// task_get
// ---------------------------------------------------------------------------

/// Fetch one task with full metadata and body.
pub struct TaskGetTool {
    host: Arc<HostApi>,
}

impl TaskGetTool {
    /// Wrap the Host API.
    pub fn new(host: Arc<HostApi>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl Tool for TaskGetTool {
    fn name(&self) -> &str {
        "task_get"
    }

    fn description(&self) -> &str {
        "Fetch a single task by id, including metadata, body, and links."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": {"type": "string", "description": "Task entity id."}
            },
            "required": ["id"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: &Value, _dry_run: bool) -> ToolResult {
        let id = match required_str(args, "id") {
            Ok(id) => id,
            Err(e) => return ToolResult::error(self.name(), e),
        };
        match self.host.read_entity(id) {
            Ok(entity) => ToolResult::ok(
                self.name(),
                json!({
                    "id": entity.id,
                    "metadata": entity.metadata,
                    "content": entity.content,
                    "backlinks": self.host.links().backlinks(&entity.id),
                }),
            ),
            Err(e) => ToolResult::error(self.name(), e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// task_create
// ---------------------------------------------------------------------------

/// Create a new task.
pub struct TaskCreateTool {
    host: Arc<HostApi>,
}

impl TaskCreateTool {
    /// Wrap the Host API.
    pub fn new(host: Arc<HostApi>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl Tool for TaskCreateTool {
    fn name(&self) -> &str {
        "task_create"
    }

    fn description(&self) -> &str {
        "Create a task. Requires a title; new tasks start in status 'todo' unless specified."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": {"type": "string", "description": "Task title."},
                "status": {
                    "type": "string",
                    "enum": ["todo", "doing", "review", "done", "blocked"]
                },
                "assignee": {"type": "string"},
                "start_ts": {"type": "string", "description": "ISO-8601 start timestamp."},
                "estimate": {"type": "string", "description": "Effort estimate, e.g. '2h'."},
                "tags": {"type": "array", "items": {"type": "string"}},
                "links": {"type": "array", "items": {"type": "string"}},
                "content": {"type": "string", "description": "Markdown body."}
            },
            "required": ["title"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: &Value, dry_run: bool) -> ToolResult {
        let metadata = collect_task_metadata(args);
        let content = optional_str(args, "content").unwrap_or_default();

        if dry_run {
            return ToolResult::ok(
                self.name(),
                json!({"dry_run": true, "would_create": metadata}),
            );
        }

        match self
            .host
            .create_entity(&EntityKind::Task, metadata, content, None)
            .await
        {
            Ok(entity) => ToolResult::ok(self.name(), task_summary(&entity)),
            Err(e) => ToolResult::error(self.name(), e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// task_update
// ---------------------------------------------------------------------------

/// Patch an existing task; state changes run through the FSM.
pub struct TaskUpdateTool {
    host: Arc<HostApi>,
}

impl TaskUpdateTool {
    /// Wrap the Host API.
    pub fn new(host: Arc<HostApi>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl Tool for TaskUpdateTool {
    fn name(&self) -> &str {
        "task_update"
    }

    fn description(&self) -> &str {
        "Update task fields. Status changes follow the task state machine: \
         starting work requires an assignee or start_ts, reopening requires \
         reopen_reason, blocking requires blocked_reason."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": {"type": "string", "description": "Task entity id."},
                "title": {"type": "string"},
                "status": {
                    "type": "string",
                    "enum": ["todo", "doing", "review", "done", "blocked"]
                },
                "assignee": {"type": "string"},
                "start_ts": {"type": "string"},
                "estimate": {"type": "string"},
                "reopen_reason": {"type": "string"},
                "blocked_reason": {"type": "string"},
                "tags": {"type": "array", "items": {"type": "string"}},
                "links": {"type": "array", "items": {"type": "string"}},
                "content": {"type": "string"}
            },
            "required": ["id"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: &Value, dry_run: bool) -> ToolResult {
        let id = match required_str(args, "id") {
            Ok(id) => id.to_owned(),
            Err(e) => return ToolResult::error(self.name(), e),
        };
        let patch = EntityPatch {
            metadata: collect_task_metadata(args),
            content: optional_str(args, "content").map(ToOwned::to_owned),
        };

        if dry_run {
            return ToolResult::ok(
                self.name(),
                json!({"dry_run": true, "id": id, "would_update": patch.metadata}),
            );
        }

        match self.host.update_entity(&id, patch, None).await {
            Ok(entity) => ToolResult::ok(self.name(), task_summary(&entity)),
            Err(e) => ToolResult::error(self.name(), e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// task_delete
// ---------------------------------------------------------------------------

/// Delete a task. Destructive: plans including it require confirmation.
pub struct TaskDeleteTool {
    host: Arc<HostApi>,
}

impl TaskDeleteTool {
    /// Wrap the Host API.
    pub fn new(host: Arc<HostApi>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl Tool for TaskDeleteTool {
    fn name(&self) -> &str {
        "task_delete"
    }

    fn description(&self) -> &str {
        "Permanently delete a task by id. This cannot be undone."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": {"type": "string", "description": "Task entity id."}
            },
            "required": ["id"],
            "additionalProperties": false
        })
    }

    fn destructive(&self) -> bool {
        true
    }

    async fn execute(&self, args: &Value, dry_run: bool) -> ToolResult {
        let id = match required_str(args, "id") {
            Ok(id) => id.to_owned(),
            Err(e) => return ToolResult::error(self.name(), e),
        };

        if dry_run {
            return ToolResult::ok(self.name(), json!({"dry_run": true, "would_delete": id}));
        }

        match self.host.delete_entity(&id, None).await {
            Ok(()) => ToolResult::ok(self.name(), json!({"deleted": id})),
            Err(e) => ToolResult::error(self.name(), e.to_string()),
        }
    }
}
