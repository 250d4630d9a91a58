//! Rollup and inbox tools.
//!
//! `rollup_daily` summarizes a local calendar day of task activity into a
//! note; the day window is computed in the configured timezone, so DST days
//! span 23 or 25 hours correctly. `inbox_normalize` re-files raw inbox
//! captures as proper notes via idempotent upsert.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use chrono_tz::Tz;
use serde_json::{json, Value};

use crate::bus::{EventBus, EventEnvelope};
use crate::host::{Entity, EntityFilter, EntityKind, HostApi};
use crate::timeutil;

use super::{optional_str, Tool, ToolResult};

// ---------------------------------------------------------------------------
// rollup_daily
// ---------------------------------------------------------------------------

/// Summarize one local day of task activity into a rollup note.
pub struct RollupDailyTool {
    host: Arc<HostApi>,
    tz: Tz,
}

impl RollupDailyTool {
    /// Wrap the Host API with the configured timezone.
    pub fn new(host: Arc<HostApi>, tz: Tz) -> Self {
        Self { host, tz }
    }

    fn tasks_in_window(
        &self,
        start: chrono::DateTime<chrono::Utc>,
        end: chrono::DateTime<chrono::Utc>,
    ) -> (Vec<Entity>, Vec<Entity>) {
        let all: Vec<Entity> = self
            .host
            .list_entities(&EntityKind::Task, &EntityFilter::default())
            .collect();

        let in_window = |key: &str, entity: &Entity| {
            entity
                .metadata
                .get(key)
                .and_then(Value::as_str)
                .and_then(|ts| timeutil::parse_utc(ts).ok())
                .map(|ts| ts >= start && ts < end)
                .unwrap_or(false)
        };

        let done = all
            .iter()
            .filter(|e| in_window("done_ts", e))
            .cloned()
            .collect();
        let touched = all
            .iter()
            .filter(|e| in_window("updated_ts", e) && !in_window("done_ts", e))
            .cloned()
            .collect();
        (done, touched)
    }
}

#[async_trait]
impl Tool for RollupDailyTool {
    fn name(&self) -> &str {
        "rollup_daily"
    }

    fn description(&self) -> &str {
        "Create a note summarizing tasks completed and touched on a local calendar day \
         (defaults to today)."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "date": {
                    "type": "string",
                    "description": "Local date YYYY-MM-DD; defaults to today."
                }
            },
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: &Value, dry_run: bool) -> ToolResult {
        let date = match optional_str(args, "date") {
            Some(raw) => match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
                Ok(date) => date,
                Err(e) => {
                    return ToolResult::error(self.name(), format!("invalid date {raw:?}: {e}"))
                }
            },
            None => timeutil::today_in(self.tz),
        };

        let (start, end) = match timeutil::local_day_bounds(self.tz, date) {
            Ok(bounds) => bounds,
            Err(e) => return ToolResult::error(self.name(), e.to_string()),
        };

        let (done, touched) = self.tasks_in_window(start, end);

        let mut body = String::new();
        body.push_str(&format!("# Daily rollup — {date}\n\n"));
        body.push_str(&format!("## Done ({})\n", done.len()));
        for task in &done {
            body.push_str(&format!("- [[{}]] {}\n", task.id, task.title()));
        }
        body.push_str(&format!("\n## In motion ({})\n", touched.len()));
        for task in &touched {
            let status = task
                .metadata
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("?");
            body.push_str(&format!("- [[{}]] {} ({status})\n", task.id, task.title()));
        }

        if dry_run {
            return ToolResult::ok(
                self.name(),
                json!({
                    "dry_run": true,
                    "date": date.to_string(),
                    "done": done.len(),
                    "touched": touched.len(),
                }),
            );
        }

        let mut metadata = BTreeMap::new();
        metadata.insert("title".to_owned(), json!(format!("Daily rollup {date}")));
        metadata.insert("tags".to_owned(), json!(["rollup"]));
        metadata.insert(
            "links".to_owned(),
            json!(done
                .iter()
                .chain(touched.iter())
                .map(|t| t.id.clone())
                .collect::<Vec<_>>()),
        );
        metadata.insert("rollup_date".to_owned(), json!(date.to_string()));

        match self
            .host
            .create_entity(&EntityKind::Note, metadata, &body, None)
            .await
        {
            Ok(entity) => ToolResult::ok(
                self.name(),
                json!({
                    "id": entity.id,
                    "date": date.to_string(),
                    "done": done.len(),
                    "touched": touched.len(),
                }),
            ),
            Err(e) => ToolResult::error(self.name(), e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// inbox_normalize
// ---------------------------------------------------------------------------

/// Re-file raw inbox captures as proper notes.
pub struct InboxNormalizeTool {
    host: Arc<HostApi>,
    bus: Arc<EventBus>,
}

impl InboxNormalizeTool {
    /// Wrap the Host API and bus.
    pub fn new(host: Arc<HostApi>, bus: Arc<EventBus>) -> Self {
        Self { host, bus }
    }
}

#[async_trait]
impl Tool for InboxNormalizeTool {
    fn name(&self) -> &str {
        "inbox_normalize"
    }

    fn description(&self) -> &str {
        "Convert raw inbox captures into notes (idempotent per capture) and \
         clear the processed inbox entries."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        })
    }

    async fn execute(&self, _args: &Value, dry_run: bool) -> ToolResult {
        let inbox_kind = EntityKind::Other("inbox".to_owned());
        let captures: Vec<Entity> = self
            .host
            .list_entities(&inbox_kind, &EntityFilter::default())
            .collect();

        if dry_run {
            return ToolResult::ok(
                self.name(),
                json!({"dry_run": true, "pending": captures.len()}),
            );
        }

        let mut normalized = Vec::new();
        let mut failures = Vec::new();

        for capture in captures {
            let mut metadata = BTreeMap::new();
            metadata.insert("title".to_owned(), json!(capture.title()));
            if let Some(tags) = capture.metadata.get("tags") {
                metadata.insert("tags".to_owned(), tags.clone());
            }
            metadata.insert("normalized_from".to_owned(), json!(capture.id));

            // The capture id doubles as the idempotency key, so re-running
            // after a partial failure never duplicates notes.
            let upsert = self
                .host
                .upsert_entity(
                    None,
                    &EntityKind::Note,
                    metadata,
                    &capture.content,
                    Some(&format!("inbox:{}", capture.id)),
                    None,
                )
                .await;

            match upsert {
                Ok((note, _created)) => {
                    if let Err(e) = self.host.delete_entity(&capture.id, None).await {
                        failures.push(format!("{}: {e}", capture.id));
                        continue;
                    }
                    normalized.push(json!({"from": capture.id, "note": note.id}));
                }
                Err(e) => failures.push(format!("{}: {e}", capture.id)),
            }
        }

        let envelope = EventEnvelope::internal(
            "inbox.normalized",
            json!({"count": normalized.len()}),
        );
        if let Err(e) = self.bus.publish(envelope).await {
            tracing::warn!(error = %e, "failed to publish inbox.normalized");
        }

        if failures.is_empty() {
            ToolResult::ok(
                self.name(),
                json!({"normalized": normalized, "count": normalized.len()}),
            )
        } else {
            ToolResult::error(
                self.name(),
                format!("normalized {} items, failures: {}", normalized.len(), failures.join("; ")),
            )
        }
    }
}
