use sibyl_core::config::QueryClassificationConfig;

/// Coarse intent of a research query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryClass {
    /// Whole-corpus digestion; clarifying behavior is suppressed.
    OneShotSummarization,
    Research,
}

const SUMMARIZATION_MARKERS: &[&str] = &[
    "summarize",
    "summarise",
    "summary",
    "overview",
    "tl;dr",
    "tldr",
    "main points",
    "key points",
    "key takeaways",
    "what is this about",
    "digest",
];

/// One-shot summarization triggers only when research mode is on, the corpus
/// is small enough to digest whole, and the query reads like a summary ask.
pub fn classify_query(
    query: &str,
    research_mode: bool,
    corpus_document_count: usize,
    config: &QueryClassificationConfig,
) -> QueryClass {
    if !config.enabled || !research_mode {
        return QueryClass::Research;
    }
    if corpus_document_count == 0 || corpus_document_count > config.one_shot_document_threshold {
        return QueryClass::Research;
    }

    let lowered = query.to_lowercase();
    if SUMMARIZATION_MARKERS.iter().any(|m| lowered.contains(m)) {
        QueryClass::OneShotSummarization
    } else {
        QueryClass::Research
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: usize) -> QueryClassificationConfig {
        QueryClassificationConfig {
            enabled: true,
            one_shot_document_threshold: threshold,
        }
    }

    #[test]
    fn summary_query_on_small_corpus_is_one_shot() {
        let class = classify_query("summarize these papers", true, 3, &config(10));
        assert_eq!(class, QueryClass::OneShotSummarization);
    }

    #[test]
    fn large_corpus_stays_research() {
        let class = classify_query("summarize these papers", true, 11, &config(10));
        assert_eq!(class, QueryClass::Research);
    }

    #[test]
    fn non_summary_query_stays_research() {
        let class = classify_query("what changed between v1 and v2?", true, 3, &config(10));
        assert_eq!(class, QueryClass::Research);
    }

    #[test]
    fn disabled_classification_never_one_shots() {
        let cfg = QueryClassificationConfig {
            enabled: false,
            one_shot_document_threshold: 10,
        };
        assert_eq!(
            classify_query("summarize", true, 1, &cfg),
            QueryClass::Research
        );
    }

    #[test]
    fn research_mode_off_never_one_shots() {
        assert_eq!(
            classify_query("summarize", false, 1, &config(10)),
            QueryClass::Research
        );
    }
}
