//! Ollama provider implementation — the local fallback.

use serde_json::{json, Value};

use super::{
    check_http_response, ChatMessage, ChatOptions, ChatResponse, ChatRole, FinishReason,
    LlmProvider, ProviderError, TokenUsage, ToolInvocation, ToolSpec,
};

/// Ollama chat API provider.
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    /// Create an Ollama provider for a local server.
    pub fn new(model: String, base_url: String) -> Self {
        Self {
            model,
            base_url,
            client: reqwest::Client::new(),
        }
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
        opts: &ChatOptions,
    ) -> Result<ChatResponse, ProviderError> {
        let model = opts.model.clone().unwrap_or_else(|| self.model.clone());

        let wire_messages: Vec<Value> = messages
            .iter()
            .map(|m| {
                json!({
                    "role": ollama_role(m.role),
                    "content": m.content,
                })
            })
            .collect();

        let mut body = json!({
            "model": model,
            "messages": wire_messages,
            "stream": false,
            "options": {
                "temperature": opts.temperature,
                "num_predict": opts.max_tokens,
            },
        });
        if !tools.is_empty() {
            let wire_tools: Vec<Value> = tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = Value::Array(wire_tools);
        }

        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .timeout(opts.timeout)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::from_transport(&e))?;

        let payload = check_http_response(response).await?;
        let parsed: Value =
            serde_json::from_str(&payload).map_err(|e| ProviderError::Parse(e.to_string()))?;

        let message = parsed
            .get("message")
            .ok_or_else(|| ProviderError::Parse("missing message".to_owned()))?;
        let content = message
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let tool_calls = parse_tool_calls(message);

        let finish_reason = if tool_calls.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolCalls
        };

        let usage = Some(TokenUsage {
            input_tokens: parsed
                .get("prompt_eval_count")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            output_tokens: parsed
                .get("eval_count")
                .and_then(Value::as_u64)
                .unwrap_or(0),
        });

        Ok(ChatResponse {
            content,
            finish_reason,
            tool_calls,
            usage,
            model,
        })
    }
}

#[async_trait::async_trait]
impl LlmProvider for OllamaProvider {
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
        "ollama"
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

fn ollama_role(role: ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
        ChatRole::Tool => "tool",
    }
}

/// Parse `message.tool_calls`; Ollama returns structured argument objects.
fn parse_tool_calls(message: &Value) -> Vec<ToolInvocation> {
    let Some(raw_calls) = message.get("tool_calls").and_then(Value::as_array) else {
        return Vec::new();
    };

    raw_calls
        .iter()
        .filter_map(|raw| {
            let function = raw.get("function")?;
            let name = function.get("name").and_then(Value::as_str)?.to_owned();
            let arguments = function.get("arguments").cloned().unwrap_or(Value::Null);
            Some(ToolInvocation {
                id: None,
                name,
                arguments,
            })
        })
        .collect()
}
