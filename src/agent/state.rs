//! Agent graph state and the partial-update merge protocol.
//!
//! Nodes are pure transformers: they read the current [`AgentState`] and
//! return a [`StateUpdate`]. The runtime merges updates — and the merge is
//! deliberately NOT preserve-by-default for the volatile fields
//! (`pending_confirmation`, `pending_plan`, `confirmation_question`,
//! `error`, `response`): a node that omits them clears them. Nodes that need
//! a volatile field to survive MUST re-emit it, which is what
//! [`StateUpdate::preserve_pending`] exists for. The respond node uses it to
//! carry the confirmation trio across the graph exit; forgetting that call
//! is the classic way to lose a pending confirmation between turns.
//!
//! Sticky fields (`messages`, `plan`, `current_step`, `tool_results`,
//! `memory`, `retry_count`, `status`, budget counters) persist unless an
//! update explicitly replaces them; `tool_results` and `memory` are
//! append/merge-only.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::providers::ChatMessage;
use crate::tools::{ToolCall, ToolResult};

use super::budget::Budget;

/// Where a graph execution currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Waiting for or producing a plan.
    Planning,
    /// A plan exists and awaits execution.
    Planned,
    /// Plan steps are executing.
    Executing,
    /// Terminal: the request finished (including confirmation questions).
    Completed,
    /// Terminal: the request failed.
    Error,
}

/// Mutable state threaded through one graph execution.
#[derive(Debug, Clone)]
pub struct AgentState {
    /// Correlation ID for this request.
    pub trace_id: String,
    /// Conversation this request belongs to.
    pub session_id: String,
    /// Requesting user identifier.
    pub user: String,
    /// Conversation history including the current user message.
    pub messages: Vec<ChatMessage>,
    /// Planned tool calls awaiting execution.
    pub plan: Vec<ToolCall>,
    /// Index of the next plan step to execute.
    pub current_step: usize,
    /// Accumulated execution outcomes.
    pub tool_results: Vec<ToolResult>,
    /// Scratchpad the nodes share (reasoning text, markers).
    pub memory: BTreeMap<String, Value>,
    /// Step and token budget for this request.
    pub budget: Budget,
    /// Replan attempts consumed after tool failures.
    pub retry_count: u32,
    /// Current error, if any (volatile).
    pub error: Option<String>,
    /// Where the execution stands.
    pub status: AgentStatus,
    /// The reply shown to the user (volatile; set by respond).
    pub response: Option<String>,
    /// Whether a destructive plan awaits user approval (volatile).
    pub pending_confirmation: bool,
    /// The saved plan awaiting approval (volatile).
    pub pending_plan: Vec<ToolCall>,
    /// The question last shown to the user (volatile).
    pub confirmation_question: String,
}

impl AgentState {
    /// Build the initial state for one request.
    pub fn new(
        trace_id: impl Into<String>,
        session_id: impl Into<String>,
        user: impl Into<String>,
        messages: Vec<ChatMessage>,
        budget: Budget,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            session_id: session_id.into(),
            user: user.into(),
            messages,
            plan: Vec::new(),
            current_step: 0,
            tool_results: Vec::new(),
            memory: BTreeMap::new(),
            budget,
            retry_count: 0,
            error: None,
            status: AgentStatus::Planning,
            response: None,
            pending_confirmation: false,
            pending_plan: Vec::new(),
            confirmation_question: String::new(),
        }
    }

    /// The latest user message text, if any.
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == crate::providers::ChatRole::User)
            .map(|m| m.content.as_str())
    }

    /// Whether more plan steps remain to execute.
    pub fn steps_remaining(&self) -> bool {
        self.current_step < self.plan.len()
    }
}

/// A node's partial state update.
///
/// Construct with builder methods; apply with [`StateUpdate::apply`].
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    plan: Option<Vec<ToolCall>>,
    current_step: Option<usize>,
    pushed_results: Vec<ToolResult>,
    memory: Vec<(String, Value)>,
    retry_count: Option<u32>,
    status: Option<AgentStatus>,
    steps_used_delta: u32,
    tokens_used_delta: u64,
    // Volatile fields: omitted means cleared.
    error: Option<String>,
    response: Option<String>,
    pending_confirmation: Option<bool>,
    pending_plan: Option<Vec<ToolCall>>,
    confirmation_question: Option<String>,
}

impl StateUpdate {
    /// Empty update (clears all volatile fields).
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the plan.
    #[must_use]
    pub fn with_plan(mut self, plan: Vec<ToolCall>) -> Self {
        self.plan = Some(plan);
        self
    }

    /// Set the next step index.
    #[must_use]
    pub fn with_current_step(mut self, step: usize) -> Self {
        self.current_step = Some(step);
        self
    }

    /// Append a tool result.
    #[must_use]
    pub fn push_tool_result(mut self, result: ToolResult) -> Self {
        self.pushed_results.push(result);
        self
    }

    /// Merge a scratchpad entry.
    #[must_use]
    pub fn with_memory(mut self, key: impl Into<String>, value: Value) -> Self {
        self.memory.push((key.into(), value));
        self
    }

    /// Set the retry counter.
    #[must_use]
    pub fn with_retry_count(mut self, count: u32) -> Self {
        self.retry_count = Some(count);
        self
    }

    /// Set the status.
    #[must_use]
    pub fn with_status(mut self, status: AgentStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Set the error (volatile; survives only this application).
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Set the user-visible response.
    #[must_use]
    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.response = Some(response.into());
        self
    }

    /// Record budget consumption.
    #[must_use]
    pub fn consume_budget(mut self, steps: u32, tokens: u64) -> Self {
        self.steps_used_delta = self.steps_used_delta.saturating_add(steps);
        self.tokens_used_delta = self.tokens_used_delta.saturating_add(tokens);
        self
    }

    /// Set the confirmation trio explicitly.
    #[must_use]
    pub fn with_pending(
        mut self,
        pending: bool,
        plan: Vec<ToolCall>,
        question: impl Into<String>,
    ) -> Self {
        self.pending_confirmation = Some(pending);
        self.pending_plan = Some(plan);
        self.confirmation_question = Some(question.into());
        self
    }

    /// Explicitly clear the confirmation trio.
    ///
    /// Functionally identical to omitting it, but states the intent at call
    /// sites that abandon a pending plan.
    #[must_use]
    pub fn clear_pending(self) -> Self {
        self.with_pending(false, Vec::new(), "")
    }

    /// Re-emit the confirmation trio from the current state so it survives
    /// this update. The respond node calls this when a confirmation question
    /// must outlive the graph exit.
    #[must_use]
    pub fn preserve_pending(mut self, state: &AgentState) -> Self {
        self.pending_confirmation = Some(state.pending_confirmation);
        self.pending_plan = Some(state.pending_plan.clone());
        self.confirmation_question = Some(state.confirmation_question.clone());
        self
    }

    /// Re-emit the current error so it survives this update.
    #[must_use]
    pub fn preserve_error(mut self, state: &AgentState) -> Self {
        self.error = state.error.clone();
        self
    }

    /// Merge this update into the state.
    ///
    /// Volatile fields reset to their defaults first; everything the update
    /// carries is then applied.
    pub fn apply(self, state: &mut AgentState) {
        // Volatile reset.
        state.error = None;
        state.response = None;
        state.pending_confirmation = false;
        state.pending_plan = Vec::new();
        state.confirmation_question = String::new();

        if let Some(plan) = self.plan {
            state.plan = plan;
        }
        if let Some(step) = self.current_step {
            state.current_step = step;
        }
        state.tool_results.extend(self.pushed_results);
        for (key, value) in self.memory {
            state.memory.insert(key, value);
        }
        if let Some(retry) = self.retry_count {
            state.retry_count = retry;
        }
        if let Some(status) = self.status {
            state.status = status;
        }
        state.budget.record_steps(self.steps_used_delta);
        state.budget.record_tokens(self.tokens_used_delta);

        state.error = self.error;
        state.response = self.response;
        if let Some(pending) = self.pending_confirmation {
            state.pending_confirmation = pending;
        }
        if let Some(plan) = self.pending_plan {
            state.pending_plan = plan;
        }
        if let Some(question) = self.confirmation_question {
            state.confirmation_question = question;
        }
    }
}
