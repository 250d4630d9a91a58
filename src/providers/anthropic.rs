//! Anthropic provider implementation using native tool calling.

use serde_json::{json, Value};

use super::{
    check_http_response, ChatMessage, ChatOptions, ChatResponse, ChatRole, FinishReason,
    LlmProvider, ProviderError, TokenUsage, ToolInvocation, ToolSpec,
};

const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic messages API provider.
#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    model: String,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider instance.
    pub fn new(model: String, api_key: String) -> Self {
        Self {
            model,
            api_key,
            base_url: ANTHROPIC_API_BASE.to_owned(),
            client: reqwest::Client::new(),
        }
    }

    /// Override the API endpoint (testing against a local stub).
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

        // Anthropic takes system text at the top level, not in messages.
        let system: String = messages
            .iter()
            .filter(|m| m.role == ChatRole::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let wire_messages: Vec<Value> = messages
            .iter()
            .filter(|m| m.role != ChatRole::System)
            .map(|m| {
                json!({
                    "role": anthropic_role(m.role),
                    "content": m.content,
                })
            })
            .collect();

        let mut body = json!({
            "model": model,
            "messages": wire_messages,
            "max_tokens": opts.max_tokens,
            "temperature": opts.temperature,
        });
        if !system.is_empty() {
            body["system"] = json!(system);
        }
        if !tools.is_empty() {
            let wire_tools: Vec<Value> = tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "input_schema": tool.parameters,
                    })
                })
                .collect();
            body["tools"] = Value::Array(wire_tools);
        }

        let response = self
            .client
            .post(&self.base_url)
            .timeout(opts.timeout)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::from_transport(&e))?;

        let payload = check_http_response(response).await?;
        let parsed: Value =
            serde_json::from_str(&payload).map_err(|e| ProviderError::Parse(e.to_string()))?;

        let content = parse_content_text(&parsed)?;
        let tool_calls = parse_tool_calls(&parsed)?;
        let finish_reason = parse_stop_reason(&parsed);
        let usage = parse_usage(&parsed);
        let served_model = parsed
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(&model)
            .to_owned();

        Ok(ChatResponse {
            content,
            finish_reason,
            tool_calls,
            usage,
            model: served_model,
        })
    }
}

#[async_trait::async_trait]
impl LlmProvider for AnthropicProvider {
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
        "anthropic"
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

fn anthropic_role(role: ChatRole) -> &'static str {
    match role {
        ChatRole::Assistant => "assistant",
        ChatRole::System | ChatRole::User | ChatRole::Tool => "user",
    }
}

fn parse_content_text(value: &Value) -> Result<String, ProviderError> {
    let Some(content_items) = value.get("content").and_then(Value::as_array) else {
        return Err(ProviderError::Parse("missing content array".to_owned()));
    };

    let mut text = String::new();
    for item in content_items {
        let item_type = item.get("type").and_then(Value::as_str).unwrap_or_default();
        if item_type == "text" {
            let part = item.get("text").and_then(Value::as_str).unwrap_or_default();
            text.push_str(part);
        }
    }
    Ok(text)
}

fn parse_tool_calls(value: &Value) -> Result<Vec<ToolInvocation>, ProviderError> {
    let Some(content_items) = value.get("content").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };

    let mut calls = Vec::new();
    for item in content_items {
        let item_type = item.get("type").and_then(Value::as_str).unwrap_or_default();
        if item_type == "tool_use" {
            let name = item
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| ProviderError::Parse("tool_use missing name".to_owned()))?
                .to_owned();
            let arguments = item.get("input").cloned().unwrap_or(Value::Null);
            let id = item
                .get("id")
                .and_then(Value::as_str)
                .map(ToOwned::to_owned);
            calls.push(ToolInvocation {
                id,
                name,
                arguments,
            });
        }
    }
    Ok(calls)
}

fn parse_stop_reason(value: &Value) -> FinishReason {
    match value.get("stop_reason").and_then(Value::as_str) {
        Some("end_turn") | Some("stop_sequence") | None => FinishReason::Stop,
        Some("tool_use") => FinishReason::ToolCalls,
        Some("max_tokens") => FinishReason::MaxTokens,
        Some(other) => FinishReason::Other(other.to_owned()),
    }
}

fn parse_usage(value: &Value) -> Option<TokenUsage> {
    let usage = value.get("usage")?;
    Some(TokenUsage {
        input_tokens: usage
            .get("input_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        output_tokens: usage
            .get("output_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0),
    })
}
