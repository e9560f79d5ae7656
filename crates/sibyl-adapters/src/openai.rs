use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use sibyl_core::types::Role;

use crate::llm::{
    ChatMessage, GenerationParams, LlmAdapter, LlmError, LlmErrorKind, ToolCallRequest, ToolSchema,
};

/// Chat adapter for OpenAI-compatible `/v1/chat/completions` endpoints.
pub struct OpenAiChatAdapter {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiChatAdapter {
    pub fn new(api_key: String, base_url: String, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl LlmAdapter for OpenAiChatAdapter {
    fn name(&self) -> &str {
        "openai-compat"
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        params: &GenerationParams,
    ) -> Result<ChatMessage, LlmError> {
        let body = build_request_body(messages, tools, params);
        let url = format!("{}/v1/chat/completions", self.base_url);

        debug!(model = %params.model, messages = messages.len(), "sending chat request");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                // Connection-level failures are retryable.
                LlmError::transient(format!("request failed: {e}"))
            })?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "chat API error");
            return Err(classify_http_error(status, &text));
        }

        let api: ApiResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::permanent(format!("response parse failed: {e}")))?;
        parse_response(api)
    }
}

/// Map an HTTP failure onto the error taxonomy.
fn classify_http_error(status: u16, body: &str) -> LlmError {
    let lowered = body.to_lowercase();
    if lowered.contains("context_length") || lowered.contains("context window")
        || lowered.contains("maximum context")
    {
        return LlmError::new(LlmErrorKind::ContextOverflow, body.to_string());
    }
    match status {
        401 | 403 => LlmError::new(LlmErrorKind::Auth, body.to_string()),
        408 | 429 => LlmError::transient(format!("status {status}: {body}")),
        s if s >= 500 => LlmError::transient(format!("status {status}: {body}")),
        _ => LlmError::permanent(format!("status {status}: {body}")),
    }
}

fn build_request_body(
    messages: &[ChatMessage],
    tools: &[ToolSchema],
    params: &GenerationParams,
) -> serde_json::Value {
    let wire_messages: Vec<serde_json::Value> = messages.iter().map(wire_message).collect();

    let mut body = serde_json::json!({
        "model": params.model,
        "messages": wire_messages,
        "max_tokens": params.max_tokens,
    });
    if let Some(t) = params.temperature {
        body["temperature"] = serde_json::json!(t);
    }
    if !tools.is_empty() {
        body["tools"] = serde_json::json!(tools
            .iter()
            .map(|t| serde_json::json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                },
            }))
            .collect::<Vec<_>>());
    }
    body
}

fn wire_message(m: &ChatMessage) -> serde_json::Value {
    match m.role {
        Role::Tool => serde_json::json!({
            "role": "tool",
            "tool_call_id": m.tool_call_id,
            "content": m.content,
        }),
        Role::Assistant if m.has_tool_calls() => {
            let calls: Vec<serde_json::Value> = m
                .tool_calls
                .iter()
                .map(|c| {
                    serde_json::json!({
                        "id": c.id,
                        "type": "function",
                        "function": { "name": c.name, "arguments": c.arguments_json },
                    })
                })
                .collect();
            serde_json::json!({
                "role": "assistant",
                "content": m.content,
                "tool_calls": calls,
            })
        }
        _ => serde_json::json!({ "role": m.role.to_string(), "content": m.content }),
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Deserialize)]
struct ApiMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ApiToolCall>,
}

#[derive(Deserialize)]
struct ApiToolCall {
    id: String,
    function: ApiFunction,
}

#[derive(Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

fn parse_response(api: ApiResponse) -> Result<ChatMessage, LlmError> {
    let choice = api
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::permanent("response carried no choices"))?;

    let tool_calls: Vec<ToolCallRequest> = choice
        .message
        .tool_calls
        .into_iter()
        .map(|c| ToolCallRequest {
            id: c.id,
            name: c.function.name,
            arguments_json: c.function.arguments,
        })
        .collect();

    Ok(ChatMessage {
        role: Role::Assistant,
        content: choice.message.content.unwrap_or_default(),
        name: None,
        tool_call_id: None,
        tool_calls,
    })
}
