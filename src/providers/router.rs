//! LLM router: task-type provider selection with retry and local fallback.
//!
//! Each call resolves `task_type → provider`, then runs the attempt loop:
//! `RateLimit`/`Timeout`/`Transient` failures retry with exponential backoff
//! (initial 1 s, factor 2, cap 30 s, 3 attempts, ±20% jitter). After remote
//! exhaustion the local provider is invoked once when fallback is enabled.
//! `Auth`/`InvalidRequest` are never retried and never trigger fallback.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::bus::apply_jitter;
use crate::config::RouterConfig;

use super::anthropic::AnthropicProvider;
use super::ollama::OllamaProvider;
use super::openai::OpenAiProvider;
use super::{ChatMessage, ChatOptions, ChatResponse, LlmProvider, ProviderError, ToolSpec};

/// Retry attempts per provider, including the first.
const MAX_ATTEMPTS: u32 = 3;

/// Initial backoff delay.
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Backoff ceiling.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Jitter fraction applied to backoff delays.
const BACKOFF_JITTER: f64 = 0.2;

/// The class of work an LLM call performs, used for provider selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskType {
    /// Tool-call planning in the agent graph.
    Planning,
    /// Structured review/extraction (reflection, normalization).
    Structuring,
    /// Everything else (reply synthesis, chat).
    Default,
}

impl TaskType {
    /// Lowercase label for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Structuring => "structuring",
            Self::Default => "default",
        }
    }
}

/// Routing errors.
#[derive(Debug, thiserror::Error)]
pub enum RouterBuildError {
    /// A task type maps to a provider that is not configured.
    #[error("provider {provider:?} for task type {task} is not configured")]
    UnavailableProvider {
        /// Missing provider name.
        provider: String,
        /// Task type label.
        task: &'static str,
    },
}

/// Multi-provider router with per-task-type selection.
pub struct LlmRouter {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    planning: String,
    structuring: String,
    default: String,
    local: Option<Arc<dyn LlmProvider>>,
    enable_local_fallback: bool,
}

impl std::fmt::Debug for LlmRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmRouter")
            .field("providers", &self.available())
            .field("fallback", &self.enable_local_fallback)
            .finish()
    }
}

impl LlmRouter {
    /// Build a router from configuration.
    ///
    /// Instantiates every provider with credentials present; Ollama is
    /// always instantiated and doubles as the local fallback.
    ///
    /// # Errors
    ///
    /// Returns [`RouterBuildError`] if a routed provider is unavailable and
    /// local fallback is disabled.
    pub fn from_config(cfg: &RouterConfig) -> Result<Self, RouterBuildError> {
        let mut providers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();

        if let Some(ref anthropic) = cfg.anthropic {
            providers.insert(
                "anthropic".to_owned(),
                Arc::new(AnthropicProvider::new(
                    anthropic.model.clone(),
                    anthropic.api_key.clone(),
                )),
            );
        }
        if let Some(ref openai) = cfg.openai {
            providers.insert(
                "openai".to_owned(),
                Arc::new(OpenAiProvider::new(
                    openai.model.clone(),
                    openai.api_key.clone(),
                )),
            );
        }
        let local: Arc<dyn LlmProvider> = Arc::new(OllamaProvider::new(
            cfg.ollama.model.clone(),
            cfg.ollama.base_url.clone(),
        ));
        providers.insert("ollama".to_owned(), Arc::clone(&local));

        let router = Self {
            providers,
            planning: cfg.planning_provider.clone(),
            structuring: cfg.structuring_provider.clone(),
            default: cfg.default_provider.clone(),
            local: Some(local),
            enable_local_fallback: cfg.enable_local_fallback,
        };

        for (name, task) in [
            (&router.planning, "planning"),
            (&router.structuring, "structuring"),
            (&router.default, "default"),
        ] {
            if !router.providers.contains_key(name) && !router.enable_local_fallback {
                return Err(RouterBuildError::UnavailableProvider {
                    provider: name.clone(),
                    task,
                });
            }
        }

        Ok(router)
    }

    /// Create a router backed by a single provider for integration tests.
    #[doc(hidden)]
    pub fn for_testing(provider: Arc<dyn LlmProvider>) -> Self {
        let name = provider.name().to_owned();
        let mut providers = HashMap::new();
        providers.insert(name.clone(), provider);
        Self {
            providers,
            planning: name.clone(),
            structuring: name.clone(),
            default: name,
            local: None,
            enable_local_fallback: false,
        }
    }

    /// Available provider names, sorted.
    pub fn available(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Resolve the provider for a task type, falling back to the local
    /// provider when the routed one is missing.
    pub fn resolve(&self, task: TaskType) -> Option<Arc<dyn LlmProvider>> {
        let name = match task {
            TaskType::Planning => &self.planning,
            TaskType::Structuring => &self.structuring,
            TaskType::Default => &self.default,
        };
        if let Some(provider) = self.providers.get(name) {
            return Some(Arc::clone(provider));
        }
        if self.enable_local_fallback {
            warn!(provider = %name, task = task.as_str(), "routed provider unavailable, using local");
            return self.local.clone();
        }
        None
    }

    /// Chat completion with retry and fallback.
    ///
    /// # Errors
    ///
    /// Returns the final [`ProviderError`] after retries and fallback.
    pub async fn chat(
        &self,
        task: TaskType,
        messages: &[ChatMessage],
        opts: &ChatOptions,
    ) -> Result<ChatResponse, ProviderError> {
        self.call(task, messages, None, opts).await
    }

    /// Tool-call completion with retry and fallback.
    ///
    /// # Errors
    ///
    /// Returns the final [`ProviderError`] after retries and fallback.
    pub async fn tool_call(
        &self,
        task: TaskType,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
        opts: &ChatOptions,
    ) -> Result<ChatResponse, ProviderError> {
        self.call(task, messages, Some(tools), opts).await
    }

    /// Single-turn generation with retry and fallback.
    ///
    /// # Errors
    ///
    /// Returns the final [`ProviderError`] after retries and fallback.
    pub async fn generate(
        &self,
        task: TaskType,
        prompt: &str,
        opts: &ChatOptions,
    ) -> Result<ChatResponse, ProviderError> {
        let messages = [ChatMessage::user(prompt)];
        self.call(task, &messages, None, opts).await
    }

    async fn call(
        &self,
        task: TaskType,
        messages: &[ChatMessage],
        tools: Option<&[ToolSpec]>,
        opts: &ChatOptions,
    ) -> Result<ChatResponse, ProviderError> {
        let provider = self.resolve(task).ok_or_else(|| {
            ProviderError::InvalidRequest(format!(
                "no provider configured for task type {}",
                task.as_str()
            ))
        })?;

        let primary = self.attempt_loop(&provider, task, messages, tools, opts).await;
        let err = match primary {
            Ok(response) => return Ok(response),
            Err(e) => e,
        };

        // Fallback: one local attempt after remote exhaustion, but never for
        // non-retryable failures and never when the primary *is* the local.
        if err.retryable() && self.enable_local_fallback {
            if let Some(local) = &self.local {
                if local.name() != provider.name() {
                    warn!(
                        task = task.as_str(),
                        primary = provider.name(),
                        error = %err,
                        "remote retries exhausted, invoking local fallback"
                    );
                    return self.attempt_once(local, task, messages, tools, opts, 0).await;
                }
            }
        }
        Err(err)
    }

    async fn attempt_loop(
        &self,
        provider: &Arc<dyn LlmProvider>,
        task: TaskType,
        messages: &[ChatMessage],
        tools: Option<&[ToolSpec]>,
        opts: &ChatOptions,
    ) -> Result<ChatResponse, ProviderError> {
        let mut last_err = ProviderError::Timeout;
        for attempt in 1..=MAX_ATTEMPTS {
            if attempt > 1 {
                let exp = attempt.saturating_sub(2).min(16);
                let backoff = INITIAL_BACKOFF
                    .saturating_mul(2u32.saturating_pow(exp))
                    .min(MAX_BACKOFF);
                tokio::time::sleep(apply_jitter(backoff, BACKOFF_JITTER)).await;
            }
            match self
                .attempt_once(provider, task, messages, tools, opts, attempt)
                .await
            {
                Ok(response) => return Ok(response),
                Err(e) if e.retryable() && attempt < MAX_ATTEMPTS => {
                    last_err = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }

    async fn attempt_once(
        &self,
        provider: &Arc<dyn LlmProvider>,
        task: TaskType,
        messages: &[ChatMessage],
        tools: Option<&[ToolSpec]>,
        opts: &ChatOptions,
        attempt: u32,
    ) -> Result<ChatResponse, ProviderError> {
        let started = Instant::now();
        let result = match tools {
            Some(tools) => provider.tool_call(messages, tools, opts).await,
            None => provider.chat(messages, opts).await,
        };
        let latency_ms = started.elapsed().as_millis();
        let trace_id = opts.trace_id.as_deref().unwrap_or("");

        match &result {
            Ok(response) => {
                let (input_tokens, output_tokens) = response
                    .usage
                    .map(|u| (u.input_tokens, u.output_tokens))
                    .unwrap_or((0, 0));
                info!(
                    trace_id,
                    provider = provider.name(),
                    model = %response.model,
                    task = task.as_str(),
                    attempt,
                    latency_ms,
                    input_tokens,
                    output_tokens,
                    outcome = "ok",
                    "llm call completed"
                );
            }
            Err(e) => {
                warn!(
                    trace_id,
                    provider = provider.name(),
                    model = provider.model_id(),
                    task = task.as_str(),
                    attempt,
                    latency_ms,
                    outcome = "error",
                    error = %e,
                    "llm call failed"
                );
            }
        }
        result
    }
}
