//! Shortlist policy ladder and candidate scoring.
//!
//! The ladder decides *whether* to spend fetch budget on external sources;
//! scoring decides *which* candidates earn it.

use std::collections::HashSet;

use sibyl_adapters::{source_id_for, SearchHit};
use sibyl_core::types::{ResearchProfile, ShortlistOverride, SourceMode, TurnRequest};
use sibyl_index::tokenize;

/// Outcome of the static ladder rungs. `Ambiguous` hands the decision to the
/// interface-model planner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShortlistDecision {
    Decided { enabled: bool, reason: String },
    Ambiguous,
}

const RECENCY_MARKERS: &[&str] = &[
    "latest", "today", "yesterday", "current", "currently", "news", "recent", "recently",
    "this week", "this month", "this year", "right now", "changelog", "release",
];

const LOCAL_MARKERS: &[&str] = &[
    "this document", "these documents", "the document", "this file", "these files",
    "the corpus", "corpus://", "uploaded", "attached", "the paper", "these papers",
];

/// Walk the ladder in spec order. Every rung records why it decided.
pub fn decide_shortlist(request: &TurnRequest, profile: &ResearchProfile) -> ShortlistDecision {
    if request.lean {
        return decided(false, "lean");
    }

    match request.shortlist_override {
        ShortlistOverride::On => return decided(true, "turn_override"),
        ShortlistOverride::Off => return decided(false, "turn_override"),
        // Reset clears the session override upstream, then falls through to
        // the automatic rungs like Auto.
        ShortlistOverride::Auto | ShortlistOverride::Reset => {}
    }

    if request.shortlist_override == ShortlistOverride::Auto {
        if let Some(enabled) = profile.shortlist_override {
            return decided(enabled, "session_override");
        }
    }

    if profile.source_mode == SourceMode::LocalOnly {
        return decided(false, "local_only");
    }

    let lowered = request.query_text.to_lowercase();
    let wants_recency = RECENCY_MARKERS.iter().any(|m| lowered.contains(m));
    let wants_local = LOCAL_MARKERS.iter().any(|m| lowered.contains(m));

    if wants_local && !wants_recency {
        return decided(false, "intent_local");
    }
    if wants_recency {
        return decided(true, "intent_web");
    }
    if profile.corpus_pointers.is_empty() && profile.source_mode != SourceMode::None {
        // Nothing local to lean on — open-ended research goes to the web.
        return decided(true, "intent_web");
    }

    ShortlistDecision::Ambiguous
}

fn decided(enabled: bool, reason: &str) -> ShortlistDecision {
    ShortlistDecision::Decided {
        enabled,
        reason: reason.to_string(),
    }
}

/// Prompt for the interface-model planner: a narrow, fenced JSON contract.
pub fn planner_prompt(query: &str) -> String {
    format!(
        "Decide whether answering the user query benefits from fetching fresh \
         external web sources.\n\nQuery: {query}\n\nReply with exactly one fenced \
         JSON block and nothing else:\n```json\n{{\"shortlist\": true}}\n```"
    )
}

/// Parse the planner reply. `None` on any malformation — the caller fails
/// safe to skipping the shortlist.
pub fn parse_planner_reply(reply: &str) -> Option<bool> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end < start {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(&reply[start..=end]).ok()?;
    value.get("shortlist")?.as_bool()
}

/// One shortlist candidate with its relevance score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub url: String,
    pub title: String,
    pub score: f32,
}

/// Domains with an editorial track record get a head start; content farms
/// pay for one.
fn domain_weight(url: &str) -> f32 {
    let host = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url)
        .split('/')
        .next()
        .unwrap_or("");

    const REPUTABLE: &[(&str, f32)] = &[
        ("wikipedia.org", 0.30),
        ("github.com", 0.20),
        ("arxiv.org", 0.25),
        ("stackoverflow.com", 0.15),
        ("docs.rs", 0.20),
    ];
    const DUBIOUS: &[(&str, f32)] = &[("pinterest.", -0.40), ("quora.com", -0.10)];

    for (domain, w) in REPUTABLE {
        if host == *domain || host.ends_with(&format!(".{domain}")) {
            return *w;
        }
    }
    if host.ends_with(".edu") || host.ends_with(".gov") {
        return 0.25;
    }
    for (fragment, w) in DUBIOUS {
        if host.contains(fragment) {
            return *w;
        }
    }
    0.0
}

/// Rank search hits by query overlap + domain reputation − corpus redundancy,
/// truncated to `budget`. Ties break by URL for determinism.
pub fn score_candidates(
    query: &str,
    hits: &[SearchHit],
    corpus_source_ids: &HashSet<String>,
    budget: usize,
) -> Vec<ScoredCandidate> {
    let query_tokens: HashSet<String> = tokenize(query).into_iter().collect();

    let mut seen_urls: HashSet<&str> = HashSet::new();
    let mut scored: Vec<ScoredCandidate> = Vec::new();

    for hit in hits {
        if !seen_urls.insert(hit.url.as_str()) {
            continue;
        }

        let hit_tokens: HashSet<String> = tokenize(&format!("{} {}", hit.title, hit.snippet))
            .into_iter()
            .collect();
        let overlap = if query_tokens.is_empty() {
            0.0
        } else {
            query_tokens.intersection(&hit_tokens).count() as f32 / query_tokens.len() as f32
        };

        let mut score = overlap + domain_weight(&hit.url);
        // Already-ingested sources add nothing new.
        if corpus_source_ids.contains(&source_id_for(&hit.url)) {
            score -= 0.5;
        }

        scored.push(ScoredCandidate {
            url: hit.url.clone(),
            title: hit.title.clone(),
            score,
        });
    }

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.url.cmp(&b.url))
    });
    scored.truncate(budget);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(query: &str) -> TurnRequest {
        TurnRequest::query(query)
    }

    fn hit(url: &str, title: &str, snippet: &str) -> SearchHit {
        SearchHit {
            url: url.to_string(),
            title: title.to_string(),
            snippet: snippet.to_string(),
        }
    }

    #[test]
    fn lean_always_skips() {
        let mut req = request("latest rust news");
        req.lean = true;
        assert_eq!(
            decide_shortlist(&req, &ResearchProfile::default()),
            ShortlistDecision::Decided {
                enabled: false,
                reason: "lean".into()
            }
        );
    }

    #[test]
    fn turn_override_beats_session_override() {
        let mut req = request("anything");
        req.shortlist_override = ShortlistOverride::On;
        let profile = ResearchProfile {
            shortlist_override: Some(false),
            ..Default::default()
        };
        match decide_shortlist(&req, &profile) {
            ShortlistDecision::Decided { enabled, reason } => {
                assert!(enabled);
                assert_eq!(reason, "turn_override");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn session_override_applies_when_turn_is_auto() {
        let req = request("anything at all");
        let profile = ResearchProfile {
            shortlist_override: Some(true),
            ..Default::default()
        };
        match decide_shortlist(&req, &profile) {
            ShortlistDecision::Decided { enabled, reason } => {
                assert!(enabled);
                assert_eq!(reason, "session_override");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn local_only_mode_skips() {
        let req = request("explain the architecture");
        let profile = ResearchProfile {
            research_mode: true,
            source_mode: SourceMode::LocalOnly,
            ..Default::default()
        };
        match decide_shortlist(&req, &profile) {
            ShortlistDecision::Decided { enabled, reason } => {
                assert!(!enabled);
                assert_eq!(reason, "local_only");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn document_questions_stay_local() {
        let req = request("what does this document say about pricing?");
        let profile = ResearchProfile {
            research_mode: true,
            source_mode: SourceMode::Mixed,
            corpus_pointers: vec![sibyl_core::CorpusHandle::new("d1")],
            ..Default::default()
        };
        match decide_shortlist(&req, &profile) {
            ShortlistDecision::Decided { enabled, reason } => {
                assert!(!enabled);
                assert_eq!(reason, "intent_local");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn recency_queries_go_to_web() {
        let req = request("latest developments in battery tech");
        let profile = ResearchProfile {
            research_mode: true,
            source_mode: SourceMode::Mixed,
            corpus_pointers: vec![sibyl_core::CorpusHandle::new("d1")],
            ..Default::default()
        };
        match decide_shortlist(&req, &profile) {
            ShortlistDecision::Decided { enabled, reason } => {
                assert!(enabled);
                assert_eq!(reason, "intent_web");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn corpus_question_without_markers_is_ambiguous() {
        let req = request("compare the two proposals");
        let profile = ResearchProfile {
            research_mode: true,
            source_mode: SourceMode::Mixed,
            corpus_pointers: vec![sibyl_core::CorpusHandle::new("d1")],
            ..Default::default()
        };
        assert_eq!(decide_shortlist(&req, &profile), ShortlistDecision::Ambiguous);
    }

    #[test]
    fn planner_reply_parses_fenced_json() {
        assert_eq!(
            parse_planner_reply("```json\n{\"shortlist\": true}\n```"),
            Some(true)
        );
        assert_eq!(parse_planner_reply("{\"shortlist\": false}"), Some(false));
    }

    #[test]
    fn malformed_planner_reply_is_none() {
        assert_eq!(parse_planner_reply("certainly! shortlist: yes"), None);
        assert_eq!(parse_planner_reply("{\"other\": 1}"), None);
    }

    #[test]
    fn scoring_prefers_overlap_and_reputation() {
        let hits = vec![
            hit("https://spam.biz/page", "unrelated listicle", "ten weird tricks"),
            hit(
                "https://en.wikipedia.org/wiki/Borrow_checker",
                "Borrow checker",
                "rust borrow checker ownership rules",
            ),
        ];
        let scored = score_candidates(
            "rust borrow checker",
            &hits,
            &HashSet::new(),
            5,
        );
        assert_eq!(scored[0].url, "https://en.wikipedia.org/wiki/Borrow_checker");
        assert!(scored[0].score > scored[1].score);
    }

    #[test]
    fn redundant_sources_are_penalized() {
        let url = "https://example.com/doc";
        let mut corpus = HashSet::new();
        corpus.insert(source_id_for(url));

        let hits = vec![
            hit(url, "matching title words", "query words here"),
            hit("https://example.com/other", "matching title words", "query words here"),
        ];
        let scored = score_candidates("matching words query", &hits, &corpus, 5);
        assert_eq!(scored[0].url, "https://example.com/other");
    }

    #[test]
    fn budget_truncates() {
        let hits: Vec<SearchHit> = (0..10)
            .map(|i| hit(&format!("https://x.org/{i}"), "t", "s"))
            .collect();
        assert_eq!(score_candidates("t", &hits, &HashSet::new(), 3).len(), 3);
    }
}
