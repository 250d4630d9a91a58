//! OpenAI provider implementation using the `/v1/chat/completions` API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    check_http_response, ChatMessage, ChatOptions, ChatResponse, ChatRole, FinishReason,
    LlmProvider, ProviderError, TokenUsage, ToolInvocation, ToolSpec,
};

const OPENAI_API_BASE: &str = "https://api.openai.com";

// ---------------------------------------------------------------------------
// Wire types (pub for integration testing)
// ---------------------------------------------------------------------------

/// OpenAI chat completions API request body.
#[doc(hidden)]
#[derive(Debug, Serialize)]
pub struct OpenAiRequest {
    /// Model identifier.
    pub model: String,
    /// Conversation messages.
    pub messages: Vec<OpenAiMessage>,
    /// Tool definitions.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<OpenAiTool>,
    /// Tool selection mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    /// Maximum completion tokens.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
}

/// A message in OpenAI chat format.
#[doc(hidden)]
#[derive(Debug, Serialize)]
pub struct OpenAiMessage {
    /// Role (`system`, `user`, `assistant`, `tool`).
    pub role: &'static str,
    /// Plain text content.
    pub content: String,
}

/// A tool definition in OpenAI format.
#[doc(hidden)]
#[derive(Debug, Serialize)]
pub struct OpenAiTool {
    /// Always `function`.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Function schema.
    pub function: OpenAiFunction,
}

/// Function schema in OpenAI tool definitions.
#[doc(hidden)]
#[derive(Debug, Serialize)]
pub struct OpenAiFunction {
    /// Function name.
    pub name: String,
    /// Description shown to the model.
    pub description: String,
    /// JSON Schema for the parameters.
    pub parameters: Value,
}

/// OpenAI chat completions API response body.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct OpenAiResponse {
    /// Response choices.
    pub choices: Vec<OpenAiChoice>,
    /// Model that served the response.
    pub model: Option<String>,
    /// Token usage.
    pub usage: Option<OpenAiUsage>,
}

/// A response choice from OpenAI.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct OpenAiChoice {
    /// Assistant message for this choice.
    pub message: OpenAiResponseMessage,
    /// Why generation stopped.
    pub finish_reason: Option<String>,
}

/// Assistant message from OpenAI.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct OpenAiResponseMessage {
    /// Optional text content.
    pub content: Option<String>,
    /// Optional tool calls.
    pub tool_calls: Option<Vec<OpenAiToolCall>>,
}

/// A tool call in OpenAI format.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct OpenAiToolCall {
    /// Unique call identifier.
    pub id: Option<String>,
    /// Function call payload.
    pub function: OpenAiFunctionCall,
}

/// Function payload in OpenAI tool calls.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct OpenAiFunctionCall {
    /// Function name.
    pub name: String,
    /// Function arguments encoded as a JSON string.
    pub arguments: String,
}

/// OpenAI usage statistics.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct OpenAiUsage {
    /// Prompt token count.
    pub prompt_tokens: Option<u64>,
    /// Completion token count.
    pub completion_tokens: Option<u64>,
}

/// Build an OpenAI API request body.
#[doc(hidden)]
pub fn build_request(
    model: &str,
    messages: &[ChatMessage],
    tools: &[ToolSpec],
    opts: &ChatOptions,
) -> OpenAiRequest {
    OpenAiRequest {
        model: model.to_owned(),
        messages: messages
            .iter()
            .map(|m| OpenAiMessage {
                role: openai_role(m.role),
                content: m.content.clone(),
            })
            .collect(),
        tools: tools
            .iter()
            .map(|tool| OpenAiTool {
                kind: "function",
                function: OpenAiFunction {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.parameters.clone(),
                },
            })
            .collect(),
        tool_choice: (!tools.is_empty()).then(|| "auto".to_owned()),
        max_tokens: opts.max_tokens,
        temperature: opts.temperature,
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// OpenAI chat completions provider.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    model: String,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiProvider {
    /// Create a new OpenAI provider instance.
    pub fn new(model: String, api_key: String) -> Self {
        Self {
            model,
            api_key,
            base_url: OPENAI_API_BASE.to_owned(),
            client: reqwest::Client::new(),
        }
    }

    /// Override the API base URL (Azure, proxies, test stubs).
    #[doc(hidden)]
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
        opts: &ChatOptions,
    ) -> Result<ChatResponse, ProviderError> {
        let model = opts.model.clone().unwrap_or_else(|| self.model.clone());
        let body = build_request(&model, messages, tools, opts);

        let url = format!("{}/v1/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .timeout(opts.timeout)
            .header("authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::from_transport(&e))?;

        let payload = check_http_response(response).await?;
        let parsed: OpenAiResponse =
            serde_json::from_str(&payload).map_err(|e| ProviderError::Parse(e.to_string()))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Parse("response has no choices".to_owned()))?;

        let content = choice.message.content.unwrap_or_default();
        let tool_calls = parse_tool_calls(choice.message.tool_calls.unwrap_or_default())?;

        let finish_reason = match choice.finish_reason.as_deref() {
            Some("stop") | None => FinishReason::Stop,
            Some("tool_calls") => FinishReason::ToolCalls,
            Some("length") => FinishReason::MaxTokens,
            Some(other) => FinishReason::Other(other.to_owned()),
        };

        let usage = parsed.usage.map(|u| TokenUsage {
            input_tokens: u.prompt_tokens.unwrap_or(0),
            output_tokens: u.completion_tokens.unwrap_or(0),
        });

        Ok(ChatResponse {
            content,
            finish_reason,
            tool_calls,
            usage,
            model: parsed.model.unwrap_or(model),
        })
    }
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiProvider {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        opts: &ChatOptions,
    ) -> Result<ChatResponse, ProviderError> {
        self.complete(messages, &[], opts).await
    }

    async fn tool_call(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
        opts: &ChatOptions,
    ) -> Result<ChatResponse, ProviderError> {
        self.complete(messages, tools, opts).await
    }

    fn name(&self) -> &str {
        "openai"
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

fn openai_role(role: ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
        ChatRole::Tool => "tool",
    }
}

/// Decode tool calls; the arguments string MUST be valid JSON, keeping the
/// "arguments are structured objects" guarantee of the adapter contract.
fn parse_tool_calls(raw: Vec<OpenAiToolCall>) -> Result<Vec<ToolInvocation>, ProviderError> {
    raw.into_iter()
        .map(|call| {
            let arguments: Value = serde_json::from_str(&call.function.arguments)
                .map_err(|e| ProviderError::Parse(format!("tool arguments not JSON: {e}")))?;
            Ok(ToolInvocation {
                id: call.id,
                name: call.function.name,
                arguments,
            })
        })
        .collect()
}
