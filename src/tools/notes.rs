//! Note tools.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::host::{EntityKind, HostApi};

use super::{optional_str, required_str, Tool, ToolResult};

/// Create a freeform note.
pub struct NoteCreateTool {
    host: Arc<HostApi>,
}

impl NoteCreateTool {
    /// Wrap the Host API.
    pub fn new(host: Arc<HostApi>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl Tool for NoteCreateTool {
    fn name(&self) -> &str {
        "note_create"
    }

    fn description(&self) -> &str {
        "Create a note with a title, optional tags and links, and a Markdown body."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": {"type": "string", "description": "Note title."},
                "tags": {"type": "array", "items": {"type": "string"}},
                "links": {"type": "array", "items": {"type": "string"}},
                "content": {"type": "string", "description": "Markdown body."}
            },
            "required": ["title"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: &Value, dry_run: bool) -> ToolResult {
        let title = match required_str(args, "title") {
            Ok(title) => title,
            Err(e) => return ToolResult::error(self.name(), e),
        };

        let mut metadata = BTreeMap::new();
        metadata.insert("title".to_owned(), json!(title));
        for key in ["tags", "links"] {
            if let Some(value) = args.get(key) {
                if !value.is_null() {
                    metadata.insert(key.to_owned(), value.clone());
                }
            }
        }
        let content = optional_str(args, "content").unwrap_or_default();

        if dry_run {
            return ToolResult::ok(
                self.name(),
                json!({"dry_run": true, "would_create": metadata}),
            );
        }

        match self
            .host
            .create_entity(&EntityKind::Note, metadata, content, None)
            .await
        {
            Ok(entity) => ToolResult::ok(
                self.name(),
                json!({"id": entity.id, "title": entity.title()}),
            ),
            Err(e) => ToolResult::error(self.name(), e.to_string()),
        }
    }
}
