//! LLM provider abstraction layer.
//!
//! Defines the [`LlmProvider`] trait and the shared request/response types
//! used by all provider implementations.
//!
//! Three providers are implemented:
//! - [`anthropic::AnthropicProvider`] — Anthropic `/v1/messages` API
//! - [`openai::OpenAiProvider`] — OpenAI `/v1/chat/completions` API
//! - [`ollama::OllamaProvider`] — Ollama `/api/chat` API (local fallback)
//!
//! The [`router::LlmRouter`] selects a provider per task type and wraps
//! every call in retry-with-backoff plus an optional local fallback.
//!
//! Structured output always uses native function calling: a provider's
//! `tool_call` returns [`ToolInvocation`]s whose `arguments` are parsed
//! JSON objects, never text to be re-parsed.

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub mod anthropic;
pub mod ollama;
pub mod openai;
pub mod router;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// Conversation participant role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// System instructions.
    System,
    /// Human user message.
    User,
    /// Assistant (LLM) message.
    Assistant,
    /// Tool result fed back after a tool call.
    Tool,
}

/// A message in a conversation with an LLM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// The role of the message author.
    pub role: ChatRole,
    /// Plain text content.
    pub content: String,
}

impl ChatMessage {
    /// Build a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    /// Build a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    /// Build an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// JSON Schema definition for a callable tool, in provider-neutral form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Tool name (must match the registry).
    pub name: String,
    /// Description shown to the LLM.
    pub description: String,
    /// JSON Schema object for the tool's parameters.
    pub parameters: serde_json::Value,
}

/// A structured tool call produced by the LLM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Provider-assigned call identifier, when available.
    pub id: Option<String>,
    /// Tool name.
    pub name: String,
    /// Parsed argument object — guaranteed structured, never raw text.
    pub arguments: serde_json::Value,
}

/// Token usage statistics for a completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens in the prompt/input.
    pub input_tokens: u64,
    /// Tokens generated in the response.
    pub output_tokens: u64,
}

impl TokenUsage {
    /// Input plus output tokens.
    pub fn total(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// Why a completion stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    /// Normal end of turn.
    Stop,
    /// The model produced tool calls.
    ToolCalls,
    /// Token limit reached.
    MaxTokens,
    /// Provider-specific other reason.
    Other(String),
}

/// A provider response.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Text content (may be empty when only tool calls were produced).
    pub content: String,
    /// Why generation stopped.
    pub finish_reason: FinishReason,
    /// Structured tool calls (possibly empty).
    pub tool_calls: Vec<ToolInvocation>,
    /// Token usage, when reported.
    pub usage: Option<TokenUsage>,
    /// Model that served the response.
    pub model: String,
}

/// Per-call options.
#[derive(Debug, Clone)]
pub struct ChatOptions {
    /// Model override; provider default when `None`.
    pub model: Option<String>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum response tokens.
    pub max_tokens: u32,
    /// HTTP timeout for the call.
    pub timeout: Duration,
    /// Correlation ID for per-attempt logging.
    pub trace_id: Option<String>,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            model: None,
            temperature: 0.2,
            max_tokens: 4096,
            timeout: Duration::from_secs(30),
            trace_id: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by LLM providers.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The call exceeded its timeout.
    #[error("provider call timed out")]
    Timeout,
    /// The provider rate-limited the call.
    #[error("provider rate limited: {0}")]
    RateLimit(String),
    /// A retryable transport or server failure.
    #[error("transient provider failure (status {status:?}): {message}")]
    Transient {
        /// HTTP status when one was received.
        status: Option<u16>,
        /// Sanitized failure description.
        message: String,
    },
    /// Authentication or authorization failure — never retried.
    #[error("provider auth failure: {0}")]
    Auth(String),
    /// The request itself is invalid — never retried.
    #[error("invalid provider request: {0}")]
    InvalidRequest(String),
    /// The response did not match the expected schema.
    #[error("provider response parse error: {0}")]
    Parse(String),
}

impl ProviderError {
    /// Whether the router may retry this failure.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::RateLimit(_) | Self::Transient { .. }
        )
    }

    /// Classify a transport-level error.
    pub fn from_transport(e: &reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Transient {
                status: None,
                message: e.to_string(),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP helpers (shared by all providers)
// ---------------------------------------------------------------------------

/// Check an HTTP response, returning the body or a classified error.
///
/// # Errors
///
/// Maps 401/403 to [`ProviderError::Auth`], 400/404/422 to
/// [`ProviderError::InvalidRequest`], 429 to [`ProviderError::RateLimit`],
/// 408 to [`ProviderError::Timeout`], and other non-2xx to
/// [`ProviderError::Transient`].
pub async fn check_http_response(response: reqwest::Response) -> Result<String, ProviderError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ProviderError::from_transport(&e))?;
    if status.is_success() {
        return Ok(body);
    }
    let sanitized = sanitize_http_error_body(&body);
    Err(match status.as_u16() {
        401 | 403 => ProviderError::Auth(sanitized),
        400 | 404 | 422 => ProviderError::InvalidRequest(sanitized),
        408 => ProviderError::Timeout,
        429 => ProviderError::RateLimit(sanitized),
        code => ProviderError::Transient {
            status: Some(code),
            message: sanitized,
        },
    })
}

fn sanitize_http_error_body(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut sanitized = collapsed;
    for pattern in [
        r"sk-ant-[A-Za-z0-9_\-]{10,}",
        r"sk-[A-Za-z0-9]{32,}",
        r"Bearer [A-Za-z0-9._\-]{10,}",
    ] {
        if let Ok(regex) = Regex::new(pattern) {
            sanitized = regex.replace_all(&sanitized, "[REDACTED]").into_owned();
        }
    }

    const MAX_ERROR_BODY_CHARS: usize = 256;
    if sanitized.chars().count() > MAX_ERROR_BODY_CHARS {
        let shortened = sanitized
            .chars()
            .take(MAX_ERROR_BODY_CHARS)
            .collect::<String>();
        return format!("{shortened}...[truncated]");
    }

    sanitized
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Core LLM provider interface.
///
/// All implementations must be `Send + Sync` for use across async task
/// boundaries in the agent graph.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Plain chat completion.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on API, network, or parse failure.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        opts: &ChatOptions,
    ) -> Result<ChatResponse, ProviderError>;

    /// Completion with native function calling.
    ///
    /// `Response.tool_calls` carries parsed argument objects.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on API, network, or parse failure.
    async fn tool_call(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
        opts: &ChatOptions,
    ) -> Result<ChatResponse, ProviderError>;

    /// Single-turn convenience wrapper over [`chat`](Self::chat).
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on API, network, or parse failure.
    async fn generate(
        &self,
        prompt: &str,
        opts: &ChatOptions,
    ) -> Result<ChatResponse, ProviderError> {
        self.chat(&[ChatMessage::user(prompt)], opts).await
    }

    /// Provider name (`anthropic`, `openai`, `ollama`).
    fn name(&self) -> &str;

    /// Default model identifier this provider is instantiated for.
    fn model_id(&self) -> &str;
}
