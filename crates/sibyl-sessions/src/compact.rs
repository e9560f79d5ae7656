use std::sync::Arc;

use tracing::{info, warn};

use sibyl_adapters::{ChatMessage, GenerationParams, LlmAdapter};
use sibyl_core::config::CompactionStrategy;
use sibyl_store::HistoryStore;

use crate::error::{Result, SessionError};

/// Threshold-triggered session compaction.
///
/// After each persisted turn the orchestrator calls `compact_if_needed`;
/// once accumulated tokens cross `threshold × context_window`, the raw
/// messages are folded into the compacted summary. Raw rows stay persisted —
/// they just stop being re-sent as prompt context.
pub struct Compactor {
    store: Arc<HistoryStore>,
    /// Summarization model; `None` forces the concat strategy.
    llm: Option<(Arc<dyn LlmAdapter>, String)>,
    strategy: CompactionStrategy,
    threshold: f64,
    context_window: u32,
}

impl Compactor {
    pub fn new(
        store: Arc<HistoryStore>,
        llm: Option<(Arc<dyn LlmAdapter>, String)>,
        strategy: CompactionStrategy,
        threshold: f64,
        context_window: u32,
    ) -> Self {
        Self {
            store,
            llm,
            strategy,
            threshold,
            context_window,
        }
    }

    /// Compact when the token accumulation crosses the threshold. Returns
    /// whether a compaction ran.
    pub async fn compact_if_needed(&self, session_id: i64) -> Result<bool> {
        let accumulated = self.store.accumulated_tokens(session_id)?;
        let limit = (self.threshold * self.context_window as f64) as u64;
        if accumulated <= limit {
            return Ok(false);
        }

        info!(
            session_id,
            accumulated, limit, "compaction threshold crossed"
        );

        let messages = self.store.session_messages_since_compaction(session_id)?;
        let Some(last) = messages.last() else {
            return Ok(false);
        };
        let through = last.id;

        let session = self
            .store
            .get_session_by_id(session_id)?
            .ok_or_else(|| SessionError::Summarization("session vanished".to_string()))?;

        let summary = match self.strategy {
            CompactionStrategy::SummaryConcat => {
                concat_summary(session.compacted_summary.as_deref(), &messages)
            }
            CompactionStrategy::LlmSummary => match &self.llm {
                Some((llm, model)) => {
                    let transcript: String = messages
                        .iter()
                        .map(|m| format!("{}: {}", m.role, m.content))
                        .collect::<Vec<_>>()
                        .join("\n\n");
                    self.llm_summary(llm.as_ref(), model, &session.compacted_summary, &transcript)
                        .await?
                }
                None => {
                    warn!(session_id, "no summarization model — falling back to concat");
                    concat_summary(session.compacted_summary.as_deref(), &messages)
                }
            },
        };

        self.store.compact_session(session_id, &summary, through)?;
        Ok(true)
    }

    async fn llm_summary(
        &self,
        llm: &dyn LlmAdapter,
        model: &str,
        previous: &Option<String>,
        transcript: &str,
    ) -> Result<String> {
        let mut prompt = String::from(
            "Condense this conversation into a compact summary that preserves \
             decisions, facts, and open threads. Plain prose, no preamble.\n\n",
        );
        if let Some(prev) = previous {
            prompt.push_str("Earlier summary:\n");
            prompt.push_str(prev);
            prompt.push_str("\n\n");
        }
        prompt.push_str("Conversation:\n");
        prompt.push_str(transcript);

        let reply = llm
            .chat(
                &[ChatMessage::user(prompt)],
                &[],
                &GenerationParams::for_model(model.to_string()),
            )
            .await
            .map_err(|e| SessionError::Summarization(e.to_string()))?;
        Ok(reply.content)
    }
}

/// Concat strategy: stitch per-message summaries (falling back to truncated
/// content) onto the existing compacted summary.
fn concat_summary(previous: Option<&str>, messages: &[sibyl_store::MessageRow]) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(prev) = previous {
        parts.push(prev.to_string());
    }
    for m in messages {
        let line = match &m.summary {
            Some(s) => s.clone(),
            None => truncate(&m.content, 160),
        };
        parts.push(format!("{}: {}", m.role, line));
    }
    parts.join("\n")
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}…")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sibyl_adapters::{LlmError, ToolSchema};
    use sibyl_core::types::{ResearchProfile, Role};

    struct EchoSummarizer;

    #[async_trait]
    impl LlmAdapter for EchoSummarizer {
        fn name(&self) -> &str {
            "echo"
        }

        async fn chat(
            &self,
            _messages: &[ChatMessage],
            _tools: &[ToolSchema],
            _params: &GenerationParams,
        ) -> std::result::Result<ChatMessage, LlmError> {
            Ok(ChatMessage::assistant("condensed summary"))
        }
    }

    fn seeded_store(tokens_per_message: u32) -> (Arc<HistoryStore>, i64) {
        let store = Arc::new(HistoryStore::open_in_memory().unwrap());
        let sid = store
            .create_session("c", &ResearchProfile::default())
            .unwrap();
        store
            .append_session_message(sid, Role::User, "first question", None, tokens_per_message)
            .unwrap();
        store
            .append_session_message(sid, Role::Assistant, "first answer", None, tokens_per_message)
            .unwrap();
        (store, sid)
    }

    #[tokio::test]
    async fn below_threshold_does_nothing() {
        let (store, sid) = seeded_store(10);
        let compactor = Compactor::new(
            Arc::clone(&store),
            None,
            CompactionStrategy::SummaryConcat,
            0.80,
            1000, // limit = 800 tokens, accumulated = 20
        );
        assert!(!compactor.compact_if_needed(sid).await.unwrap());
        assert!(store
            .get_session_by_id(sid)
            .unwrap()
            .unwrap()
            .compacted_summary
            .is_none());
    }

    #[tokio::test]
    async fn concat_strategy_folds_messages_into_summary() {
        let (store, sid) = seeded_store(500);
        let compactor = Compactor::new(
            Arc::clone(&store),
            None,
            CompactionStrategy::SummaryConcat,
            0.80,
            1000, // limit = 800 < 1000 accumulated
        );
        assert!(compactor.compact_if_needed(sid).await.unwrap());

        let session = store.get_session_by_id(sid).unwrap().unwrap();
        let summary = session.compacted_summary.unwrap();
        assert!(summary.contains("first question"));
        assert!(summary.contains("first answer"));
        // Everything is compacted away from the live context.
        assert!(store
            .session_messages_since_compaction(sid)
            .unwrap()
            .is_empty());
        assert_eq!(store.accumulated_tokens(sid).unwrap(), 0);
    }

    #[tokio::test]
    async fn llm_strategy_replaces_summary_with_model_output() {
        let (store, sid) = seeded_store(500);
        let compactor = Compactor::new(
            Arc::clone(&store),
            Some((Arc::new(EchoSummarizer), "sum-model".to_string())),
            CompactionStrategy::LlmSummary,
            0.80,
            1000,
        );
        assert!(compactor.compact_if_needed(sid).await.unwrap());
        let session = store.get_session_by_id(sid).unwrap().unwrap();
        assert_eq!(session.compacted_summary.as_deref(), Some("condensed summary"));
    }

    #[tokio::test]
    async fn raw_messages_remain_persisted_after_compaction() {
        let (store, sid) = seeded_store(500);
        let compactor = Compactor::new(
            Arc::clone(&store),
            None,
            CompactionStrategy::SummaryConcat,
            0.80,
            1000,
        );
        compactor.compact_if_needed(sid).await.unwrap();

        use sibyl_store::MessageFilter;
        let all = store
            .list_messages(
                &MessageFilter {
                    session: Some(Some(sid)),
                    role: None,
                },
                100,
            )
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo wörld", 5), "héllo…");
        assert_eq!(truncate("short", 10), "short");
    }
}
