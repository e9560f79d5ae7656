use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use sibyl_core::types::Role;

/// One message in the wire conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Set on `tool` messages: which call this result answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Set on assistant messages that request tool execution.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            name: None,
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: Vec::new(),
        }
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// A tool call extracted from the model response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    /// Raw JSON-encoded arguments, parsed lazily at dispatch.
    pub arguments_json: String,
}

impl ToolCallRequest {
    pub fn arguments(&self) -> serde_json::Value {
        serde_json::from_str(&self.arguments_json).unwrap_or(serde_json::Value::Null)
    }
}

/// Tool definition sent to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Generation parameters for one request.
#[derive(Debug, Clone)]
pub struct GenerationParams {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

impl GenerationParams {
    pub fn for_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            max_tokens: 4096,
            temperature: None,
        }
    }
}

/// Error classification the orchestrator's retry and fallback paths key on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// Retryable: rate limits, 5xx, connection resets.
    Transient,
    /// The request exceeded the model's context window.
    ContextOverflow,
    /// Credentials rejected.
    Auth,
    /// Anything else; retrying will not help.
    Permanent,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind:?} LLM error: {message}")]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub message: String,
}

impl LlmError {
    pub fn new(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Permanent, message)
    }
}

/// Common interface for all chat model backends.
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    /// Backend name for logging and error attribution.
    fn name(&self) -> &str;

    /// Send one request and wait for the full assistant message.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        params: &GenerationParams,
    ) -> Result<ChatMessage, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_arguments_parse_lazily() {
        let call = ToolCallRequest {
            id: "c1".into(),
            name: "web_search".into(),
            arguments_json: r#"{"query": "rust"}"#.into(),
        };
        assert_eq!(call.arguments()["query"], "rust");
    }

    #[test]
    fn malformed_arguments_become_null() {
        let call = ToolCallRequest {
            id: "c1".into(),
            name: "t".into(),
            arguments_json: "{not json".into(),
        };
        assert!(call.arguments().is_null());
    }

    #[test]
    fn constructors_set_roles() {
        assert_eq!(ChatMessage::system("s").role, Role::System);
        assert_eq!(ChatMessage::user("u").role, Role::User);
        let t = ChatMessage::tool_result("id9", "out");
        assert_eq!(t.role, Role::Tool);
        assert_eq!(t.tool_call_id.as_deref(), Some("id9"));
    }
}
