//! Background turn summarization and memory auto-extraction.
//!
//! Both run on detached tasks after the answer is already on its way to the
//! user; history insertion waits for the summaries (bounded) so the rows can
//! carry them from the start.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use sibyl_adapters::{ChatMessage, EmbeddingAdapter, GenerationParams, LlmAdapter};
use sibyl_store::HistoryStore;

/// Upper bound on waiting for a summary before persisting without one.
pub const SUMMARY_TIMEOUT: Duration = Duration::from_secs(20);

/// One-line summaries of the query and the answer.
pub async fn summarize_turn(
    llm: &dyn LlmAdapter,
    model: &str,
    query: &str,
    answer: &str,
) -> Option<(String, String)> {
    let prompt = format!(
        "Write one line (max 15 words) summarizing the QUESTION, then one line \
         summarizing the ANSWER. Two lines, nothing else.\n\n\
         QUESTION: {query}\n\nANSWER: {answer}"
    );
    let reply = llm
        .chat(
            &[ChatMessage::user(prompt)],
            &[],
            &GenerationParams::for_model(model.to_string()),
        )
        .await
        .ok()?;

    let mut lines = reply.content.lines().filter(|l| !l.trim().is_empty());
    let query_summary = lines.next()?.trim().to_string();
    let answer_summary = lines.next().unwrap_or("").trim().to_string();
    Some((query_summary, answer_summary))
}

/// Extract durable user facts from the turn and store them through the
/// deduplicating memory writer. Best-effort: failures only log.
pub async fn extract_memories(
    llm: &dyn LlmAdapter,
    model: &str,
    embedder: &Arc<dyn EmbeddingAdapter>,
    store: &Arc<HistoryStore>,
    query: &str,
    answer: &str,
) {
    let prompt = format!(
        "Extract lasting facts about the USER from this exchange (preferences, \
         stated facts, standing instructions). Return ONLY a JSON array of \
         short strings, at most 5 items; [] if nothing is worth keeping.\n\n\
         USER: {query}\n\nASSISTANT: {answer}"
    );
    let reply = match llm
        .chat(
            &[ChatMessage::user(prompt)],
            &[],
            &GenerationParams::for_model(model.to_string()),
        )
        .await
    {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "memory extraction call failed");
            return;
        }
    };

    let raw = reply.content.trim();
    let json = match (raw.find('['), raw.rfind(']')) {
        (Some(s), Some(e)) if e >= s => &raw[s..=e],
        _ => raw,
    };
    let facts: Vec<String> = match serde_json::from_str(json) {
        Ok(f) => f,
        Err(e) => {
            warn!(error = %e, "memory extraction reply unparseable");
            return;
        }
    };

    for fact in facts {
        if fact.trim().is_empty() {
            continue;
        }
        let vector = match embedder.embed(&[fact.clone()]).await {
            Ok(mut v) => v.pop().unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "memory embedding failed");
                continue;
            }
        };
        match store.save_memory(&fact, &vector) {
            Ok((id, updated)) => debug!(id, updated, "memory stored"),
            Err(e) => warn!(error = %e, "memory store failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use sibyl_adapters::{HashEmbedder, LlmError, ToolSchema};

    struct FixedLlm(&'static str);

    #[async_trait]
    impl LlmAdapter for FixedLlm {
        fn name(&self) -> &str {
            "fixed"
        }
        async fn chat(
            &self,
            _m: &[ChatMessage],
            _t: &[ToolSchema],
            _p: &GenerationParams,
        ) -> Result<ChatMessage, LlmError> {
            Ok(ChatMessage::assistant(self.0))
        }
    }

    #[tokio::test]
    async fn summaries_split_into_two_lines() {
        let llm = FixedLlm("asked about rust\nexplained the borrow checker");
        let (q, a) = summarize_turn(&llm, "m", "q", "a").await.unwrap();
        assert_eq!(q, "asked about rust");
        assert_eq!(a, "explained the borrow checker");
    }

    #[tokio::test]
    async fn extraction_saves_parsed_facts() {
        let llm = FixedLlm(r#"["prefers metric units", "works at night"]"#);
        let store = Arc::new(HistoryStore::open_in_memory().unwrap());
        let embedder: Arc<dyn EmbeddingAdapter> = Arc::new(HashEmbedder::new(32));
        extract_memories(&llm, "m", &embedder, &store, "q", "a").await;
        assert_eq!(store.list_memories().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn garbage_extraction_reply_saves_nothing() {
        let llm = FixedLlm("I could not find any facts, sorry!");
        let store = Arc::new(HistoryStore::open_in_memory().unwrap());
        let embedder: Arc<dyn EmbeddingAdapter> = Arc::new(HashEmbedder::new(32));
        extract_memories(&llm, "m", &embedder, &store, "q", "a").await;
        assert!(store.list_memories().unwrap().is_empty());
    }
}
