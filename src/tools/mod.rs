//! Tool registry: the declarative catalog of operations exposed to the LLM.
//!
//! Each [`Tool`] declares a name, description, JSON-schema parameters, and a
//! `destructive` flag feeding the reflection policy. The registry's
//! [`to_api_format`](ToolRegistry::to_api_format) is the ONLY path from
//! internal tools to LLM function schemas — structured output is always
//! native function calling, never prompt-engineered JSON.
//!
//! Tools wrap Host API calls and must never panic: every failure becomes a
//! [`ToolResult`] with `status = error`.

pub mod notes;
pub mod rollup;
pub mod tasks;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::providers::ToolSpec;

// ---------------------------------------------------------------------------
// Descriptors and results
// ---------------------------------------------------------------------------

/// A planned tool invocation awaiting execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Registered tool name.
    pub tool: String,
    /// Argument object.
    pub args: Value,
    /// Plan without mutating when `true`.
    #[serde(default)]
    pub dry_run: bool,
}

/// Tool execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    /// The tool succeeded.
    Ok,
    /// The tool failed; `error` carries the reason.
    Error,
}

/// The outcome of one tool execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Which tool ran.
    pub tool: String,
    /// Success or failure.
    pub status: ToolStatus,
    /// Structured result data (empty object on failure).
    pub data: Value,
    /// Failure reason when `status = error`.
    pub error: Option<String>,
}

impl ToolResult {
    /// Successful result carrying data.
    pub fn ok(tool: impl Into<String>, data: Value) -> Self {
        Self {
            tool: tool.into(),
            status: ToolStatus::Ok,
            data,
            error: None,
        }
    }

    /// Failed result carrying an error message.
    pub fn error(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            status: ToolStatus::Error,
            data: json!({}),
            error: Some(message.into()),
        }
    }

    /// Whether this result reports failure.
    pub fn is_error(&self) -> bool {
        self.status == ToolStatus::Error
    }
}

// ---------------------------------------------------------------------------
// Tool trait
// ---------------------------------------------------------------------------

/// A callable operation exposed to the LLM.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Stable dotted identifier (e.g. `task_create`).
    fn name(&self) -> &str;

    /// Human-readable description shown to the LLM.
    fn description(&self) -> &str;

    /// JSON Schema object describing the arguments.
    fn parameters(&self) -> Value;

    /// Whether executing this tool destroys or mass-mutates data.
    /// Destructive tools route plans through reflection.
    fn destructive(&self) -> bool {
        false
    }

    /// Execute with validated arguments. `dry_run` previews without writes.
    async fn execute(&self, args: &Value, dry_run: bool) -> ToolResult;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Errors from tool registration.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// A tool's parameter schema failed to compile.
    #[error("invalid parameter schema for tool {tool}: {reason}")]
    InvalidSchema {
        /// Offending tool.
        tool: String,
        /// Compiler message.
        reason: String,
    },
    /// Two tools share a name.
    #[error("duplicate tool name: {0}")]
    DuplicateName(String),
}

/// The catalog of registered tools.
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
    validators: BTreeMap<String, Arc<jsonschema::Validator>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
            validators: BTreeMap::new(),
        }
    }

    /// Register a tool, compiling its parameter schema.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] for duplicate names or invalid schemas.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.name().to_owned();
        if self.tools.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }
        let schema = tool.parameters();
        let validator =
            jsonschema::validator_for(&schema).map_err(|e| RegistryError::InvalidSchema {
                tool: name.clone(),
                reason: e.to_string(),
            })?;
        self.validators.insert(name.clone(), Arc::new(validator));
        self.tools.insert(name.clone(), tool);
        debug!(tool = %name, "tool registered");
        Ok(())
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Whether a tool is flagged destructive.
    pub fn is_destructive(&self, name: &str) -> bool {
        self.tools
            .get(name)
            .map(|t| t.destructive())
            .unwrap_or(false)
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Validate an argument object against a tool's schema.
    ///
    /// Returns violation messages; empty means valid. Unknown tools yield a
    /// single "unknown tool" violation.
    pub fn validate_args(&self, name: &str, args: &Value) -> Vec<String> {
        let Some(validator) = self.validators.get(name) else {
            return vec![format!("unknown tool: {name}")];
        };
        validator
            .iter_errors(args)
            .map(|e| format!("{}: {e}", e.instance_path()))
            .collect()
    }

    /// Produce the provider-neutral tool list for the LLM.
    ///
    /// This is the sole sanctioned path from internal tools to LLM function
    /// schemas.
    pub fn to_api_format(&self) -> Vec<ToolSpec> {
        self.tools
            .values()
            .map(|tool| ToolSpec {
                name: tool.name().to_owned(),
                description: tool.description().to_owned(),
                parameters: tool.parameters(),
            })
            .collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Shared argument helpers
// ---------------------------------------------------------------------------

/// Extract a required string argument.
pub(crate) fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, String> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("missing required field: {key}"))
}

/// Extract an optional string argument.
pub(crate) fn optional_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}
