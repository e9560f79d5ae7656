//! System-prompt and message assembly for one turn.

use sibyl_adapters::ChatMessage;
use sibyl_core::types::{EvidenceSnippet, PreloadResolution, Role};
use sibyl_store::MessageRow;

const BASE_PROMPT: &str = "You are sibyl, a research assistant. Answer from the \
provided context and tool results; cite corpus:// handles when you draw on \
retrieved passages. Say so plainly when you do not know.";

/// Everything that goes into the system message, in assembly order.
pub struct PromptInputs<'a> {
    /// Tool guideline snippets from the enabled registry.
    pub tool_guidelines: Vec<String>,
    /// Recalled user memories; empty in lean mode.
    pub memories: Vec<String>,
    /// Compacted session summary, when one exists.
    pub compacted_summary: Option<&'a str>,
    /// Context assembled from continue-ids (stateless context turns).
    pub continued_context: Option<&'a str>,
    pub preload: &'a PreloadResolution,
    /// Direct-answer turns forbid further acquisition.
    pub direct_answer: bool,
}

/// Build the base system prompt. The `SYSTEM_PROMPT_EXTEND` chain runs on
/// this text afterwards.
pub fn system_prompt(inputs: &PromptInputs<'_>) -> String {
    let mut prompt = String::from(BASE_PROMPT);

    if !inputs.tool_guidelines.is_empty() {
        prompt.push_str("\n\n## Tool guidelines\n");
        prompt.push_str(&inputs.tool_guidelines.join("\n"));
    }
    if inputs.direct_answer {
        prompt.push_str(
            "\n\nAll needed sources are already in context. Answer directly; \
             do not attempt further retrieval.",
        );
    }
    prompt
}

/// Append the post-chain blocks: user memory, loaded context, preloaded
/// sources. Order is fixed.
pub fn context_blocks(system: &mut String, inputs: &PromptInputs<'_>) {
    if !inputs.memories.is_empty() {
        system.push_str("\n\n## User Memory\n");
        for memory in &inputs.memories {
            system.push_str(&format!("- {memory}\n"));
        }
    }

    if let Some(summary) = inputs.compacted_summary {
        system.push_str("\n\n## Conversation so far (compacted)\n");
        system.push_str(summary);
    }

    if let Some(context) = inputs.continued_context {
        system.push_str("\n\n## Earlier exchanges\n");
        system.push_str(context);
    }

    if !inputs.preload.preloaded_source_handles.is_empty() {
        system.push_str("\n\n## Preloaded sources\n");
        for handle in &inputs.preload.preloaded_source_handles {
            system.push_str(&format!("- {handle}\n"));
        }
    }
}

/// The first user-visible message: bootstrap evidence ahead of the query.
pub fn user_message(query: &str, evidence: &[EvidenceSnippet]) -> ChatMessage {
    if evidence.is_empty() {
        return ChatMessage::user(query.to_string());
    }

    let mut content = String::from("Relevant passages from the preloaded corpus:\n");
    for snippet in evidence {
        content.push_str(&format!("\n[{}] {}\n", snippet.handle, snippet.text));
    }
    content.push_str("\n---\n\n");
    content.push_str(query);
    ChatMessage::user(content)
}

/// Session history rows as wire messages, oldest first.
pub fn history_messages(rows: &[MessageRow]) -> Vec<ChatMessage> {
    rows.iter()
        .filter(|m| matches!(m.role, Role::User | Role::Assistant))
        .map(|m| match m.role {
            Role::Assistant => ChatMessage::assistant(m.content.clone()),
            _ => ChatMessage::user(m.content.clone()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sibyl_core::CorpusHandle;

    fn empty_preload() -> PreloadResolution {
        PreloadResolution::default()
    }

    #[test]
    fn assembly_order_is_stable() {
        let preload = PreloadResolution {
            preloaded_source_handles: vec![CorpusHandle::new("d1")],
            ..Default::default()
        };
        let inputs = PromptInputs {
            tool_guidelines: vec!["- web_search: be frugal".to_string()],
            memories: vec!["prefers terse answers".to_string()],
            compacted_summary: Some("we discussed X"),
            continued_context: None,
            preload: &preload,
            direct_answer: false,
        };

        let mut system = system_prompt(&inputs);
        context_blocks(&mut system, &inputs);

        let guidelines = system.find("## Tool guidelines").unwrap();
        let memory = system.find("## User Memory").unwrap();
        let summary = system.find("## Conversation so far").unwrap();
        let sources = system.find("## Preloaded sources").unwrap();
        assert!(guidelines < memory && memory < summary && summary < sources);
    }

    #[test]
    fn direct_answer_appends_directive() {
        let preload = empty_preload();
        let inputs = PromptInputs {
            tool_guidelines: vec![],
            memories: vec![],
            compacted_summary: None,
            continued_context: None,
            preload: &preload,
            direct_answer: true,
        };
        assert!(system_prompt(&inputs).contains("Answer directly"));
    }

    #[test]
    fn evidence_rides_in_the_first_user_message() {
        let evidence = vec![EvidenceSnippet {
            handle: CorpusHandle::new("d1"),
            text: "the fact".to_string(),
            score: 0.9,
        }];
        let msg = user_message("what about it?", &evidence);
        assert!(msg.content.contains("corpus://cache/d1"));
        assert!(msg.content.contains("the fact"));
        assert!(msg.content.ends_with("what about it?"));
    }

    #[test]
    fn no_evidence_means_plain_query() {
        let msg = user_message("hello", &[]);
        assert_eq!(msg.content, "hello");
    }
}
