use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use sibyl_core::config::LimitsConfig;

use crate::llm::{ChatMessage, GenerationParams, LlmAdapter, LlmError, LlmErrorKind, ToolSchema};

/// Decorator that retries transient failures with exponential backoff.
///
/// Only `LlmErrorKind::Transient` is retried; overflow, auth and permanent
/// errors propagate on the first attempt.
pub struct RetryingLlm {
    inner: Arc<dyn LlmAdapter>,
    max_retries: u32,
    initial_backoff_ms: u64,
    max_backoff_ms: u64,
}

impl RetryingLlm {
    pub fn new(inner: Arc<dyn LlmAdapter>, limits: &LimitsConfig) -> Self {
        Self {
            inner,
            max_retries: limits.max_retries,
            initial_backoff_ms: limits.initial_backoff_ms,
            max_backoff_ms: limits.max_backoff_ms,
        }
    }
}

#[async_trait]
impl LlmAdapter for RetryingLlm {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        params: &GenerationParams,
    ) -> Result<ChatMessage, LlmError> {
        let mut backoff_ms = self.initial_backoff_ms;

        for attempt in 0..=self.max_retries {
            match self.inner.chat(messages, tools, params).await {
                Ok(msg) => return Ok(msg),
                Err(e) if e.kind == LlmErrorKind::Transient && attempt < self.max_retries => {
                    warn!(
                        attempt,
                        max = self.max_retries,
                        backoff_ms,
                        error = %e,
                        "transient LLM failure, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms = (backoff_ms * 2).min(self.max_backoff_ms);
                }
                Err(e) => return Err(e),
            }
        }

        unreachable!("retry loop always returns")
    }
}
