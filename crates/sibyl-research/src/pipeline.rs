use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use sibyl_adapters::{
    ChatMessage, EmbeddingAdapter, GenerationParams, LlmAdapter, WebSearcher,
};
use sibyl_core::config::ResearchConfig;
use sibyl_core::types::{
    EvidenceSnippet, PreloadResolution, ResearchProfile, ShortlistOverride, SourceMode,
    TurnRequest,
};
use sibyl_core::CorpusHandle;
use sibyl_index::{SearchFilters, VectorIndex};
use sibyl_store::HistoryStore;

use crate::classify::{classify_query, QueryClass};
use crate::error::{ResearchError, Result};
use crate::ingest::Ingestor;
use crate::keywords::expand_subqueries;
use crate::shortlist::{
    decide_shortlist, parse_planner_reply, planner_prompt, score_candidates, ScoredCandidate,
    ShortlistDecision,
};

/// Evidence snippets injected by bootstrap retrieval.
const BOOTSTRAP_K: usize = 5;
/// Evidence extraction only runs for shortlists smaller than this.
const EVIDENCE_EXTRACTION_MAX_CANDIDATES: usize = 3;
/// Sub-queries sent to the web searcher during shortlist execution.
const MAX_SUBQUERIES: usize = 3;

/// Everything the preload stage hands to the orchestrator.
#[derive(Debug, Default)]
pub struct PreloadOutcome {
    pub resolution: PreloadResolution,
    /// Handles ingested this turn (excluding resolved session pointers).
    /// These replace the session's stored pointer list when sources were
    /// passed explicitly.
    pub fresh_handles: Vec<CorpusHandle>,
    /// Query classified as one-shot summarization — clarifying behavior off.
    pub one_shot: bool,
    pub expanded_queries: Vec<String>,
    pub shortlist: Vec<ScoredCandidate>,
}

/// The preload pipeline: classification → expansion → ingestion → shortlist
/// policy → shortlist execution → bootstrap retrieval → evidence extraction.
pub struct PreloadPipeline {
    index: Arc<VectorIndex>,
    store: Arc<HistoryStore>,
    embedder: Arc<dyn EmbeddingAdapter>,
    searcher: Arc<dyn WebSearcher>,
    /// Planner / expansion / evidence model; `None` disables those stages.
    interface_llm: Option<(Arc<dyn LlmAdapter>, String)>,
    ingestor: Ingestor,
    config: ResearchConfig,
}

impl PreloadPipeline {
    pub fn new(
        index: Arc<VectorIndex>,
        store: Arc<HistoryStore>,
        embedder: Arc<dyn EmbeddingAdapter>,
        searcher: Arc<dyn WebSearcher>,
        interface_llm: Option<(Arc<dyn LlmAdapter>, String)>,
        ingestor: Ingestor,
        config: ResearchConfig,
    ) -> Self {
        Self {
            index,
            store,
            embedder,
            searcher,
            interface_llm,
            ingestor,
            config,
        }
    }

    /// Run every applicable stage for one turn.
    ///
    /// Halts with `CorpusMissing` when a local-corpus mode ends up with zero
    /// content-bearing documents — before any main-model call is made.
    pub async fn run(
        &self,
        request: &TurnRequest,
        profile: &ResearchProfile,
        session_id: Option<i64>,
    ) -> Result<PreloadOutcome> {
        let mut outcome = PreloadOutcome::default();

        // Plain chat turn with nothing to preload.
        if !profile.research_mode && request.additional_source_context.is_empty() {
            outcome.resolution.shortlist_reason = "not_research".to_string();
            return Ok(outcome);
        }

        // Resolve which stored pointers still have chunks behind them.
        let pointer_docs: Vec<String> = profile
            .corpus_pointers
            .iter()
            .map(|h| h.document_id.clone())
            .filter(|doc| self.index.document_chunk_count(doc) > 0)
            .collect();

        // 1. Query classification, against the corpus as the user sees it.
        let estimated_corpus = pointer_docs.len() + request.additional_source_context.len();
        let class = classify_query(
            &request.query_text,
            profile.research_mode,
            estimated_corpus,
            &self.config.query_classification,
        );
        outcome.one_shot = class == QueryClass::OneShotSummarization;

        // 2. Deterministic keyword expansion always runs. The model-based
        //    second pass is deferred until the corpus question is settled:
        //    a turn that halts on a missing corpus must not spend an LLM
        //    call first.
        outcome.expanded_queries = expand_subqueries(&request.query_text, MAX_SUBQUERIES);

        // 3. Local ingestion (root guard inside). In local_only mode URL
        //    sources are refused up front.
        let mut sources: Vec<String> = request.additional_source_context.clone();
        if profile.source_mode == SourceMode::LocalOnly {
            let (urls, paths): (Vec<String>, Vec<String>) = sources
                .into_iter()
                .partition(|s| s.starts_with("http://") || s.starts_with("https://"));
            for url in urls {
                outcome
                    .resolution
                    .diagnostics
                    .push(format!("web source refused in local_only mode: {url}"));
            }
            sources = paths;
        }

        let report = self.ingestor.ingest_sources(&sources).await?;
        outcome.resolution.diagnostics.extend(report.diagnostics);

        outcome.fresh_handles = report.handles.clone();
        let mut preloaded: Vec<CorpusHandle> = report.handles.clone();
        for doc in &pointer_docs {
            let handle = CorpusHandle::new(doc.clone());
            if !preloaded.contains(&handle) {
                preloaded.push(handle);
            }
        }

        // Corpus is preloaded when anything usable exists — fresh chunks or
        // chunks already resolvable from the session's pointers.
        outcome.resolution.is_corpus_preloaded = !preloaded.is_empty();
        outcome.resolution.preloaded_source_handles = preloaded.clone();

        if let Some(sid) = session_id {
            for handle in &report.handles {
                self.store.add_session_document(sid, &handle.document_id)?;
            }
        }

        // Local-corpus modes halt hard on an empty corpus. No web fallback,
        // no memory fallback, no LLM call.
        if profile.research_mode
            && profile.source_mode.requires_local_corpus()
            && report.content_documents == 0
            && pointer_docs.is_empty()
        {
            warn!("local corpus expected but nothing ingested — halting turn");
            return Err(ResearchError::CorpusMissing);
        }

        // Secondary model-based expansion, now that the turn is known to
        // proceed. Skipped in lean mode.
        if !request.lean {
            if let Some(extra) = self.llm_expansion(&request.query_text).await {
                for q in extra {
                    if !outcome.expanded_queries.contains(&q) {
                        outcome.expanded_queries.push(q);
                    }
                }
            }
        }

        // 4. Shortlist policy ladder; ambiguity goes to the planner.
        let (shortlist_enabled, reason) = match decide_shortlist(request, profile) {
            ShortlistDecision::Decided { enabled, reason } => (enabled, reason),
            ShortlistDecision::Ambiguous => self.ask_planner(&request.query_text).await,
        };
        outcome.resolution.shortlist_enabled = shortlist_enabled;
        outcome.resolution.shortlist_reason = reason;
        if request.shortlist_override == ShortlistOverride::Reset {
            if let Some(sid) = session_id {
                let mut cleared = profile.clone();
                cleared.shortlist_override = None;
                self.store.update_session_research_profile(sid, &cleared)?;
            }
        }

        // 5. Shortlist execution.
        if shortlist_enabled {
            outcome.shortlist = self
                .run_shortlist(&outcome.expanded_queries, &preloaded)
                .await;
            info!(candidates = outcome.shortlist.len(), "shortlist ranked");
        }

        // 6. Bootstrap retrieval over the preloaded corpus.
        if profile.research_mode && outcome.resolution.is_corpus_preloaded {
            outcome.resolution.bootstrap_evidence = self
                .bootstrap_retrieval(&request.query_text, &preloaded)
                .await?;
        }

        // 7. Evidence extraction, only for small shortlists.
        if self.config.evidence_extraction_enabled
            && shortlist_enabled
            && outcome.shortlist.len() < EVIDENCE_EXTRACTION_MAX_CANDIDATES
            && !outcome.resolution.bootstrap_evidence.is_empty()
        {
            if let Some(facts) = self
                .extract_evidence(&request.query_text, &outcome.resolution.bootstrap_evidence)
                .await
            {
                outcome
                    .resolution
                    .diagnostics
                    .push(format!("evidence extraction produced {} facts", facts.len()));
                outcome.resolution.bootstrap_evidence.extend(facts);
            }
        }

        Ok(outcome)
    }

    /// Secondary model-based query expansion. Best-effort: any failure means
    /// the deterministic keywords stand alone.
    async fn llm_expansion(&self, query: &str) -> Option<Vec<String>> {
        let (llm, model) = self.interface_llm.as_ref()?;
        let prompt = format!(
            "Rewrite this search need as up to 2 alternative short search queries, \
             one per line, no numbering, nothing else:\n\n{query}"
        );
        let reply = llm
            .chat(
                &[ChatMessage::user(prompt)],
                &[],
                &GenerationParams::for_model(model.clone()),
            )
            .await
            .ok()?;
        let lines: Vec<String> = reply
            .content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .take(2)
            .map(str::to_string)
            .collect();
        (!lines.is_empty()).then_some(lines)
    }

    /// Interface-model planner for the ambiguous rung. Any malformed reply
    /// fails safe to skipping the shortlist.
    async fn ask_planner(&self, query: &str) -> (bool, String) {
        let Some((llm, model)) = self.interface_llm.as_ref() else {
            return (false, "planner_unavailable".to_string());
        };
        let reply = llm
            .chat(
                &[ChatMessage::user(planner_prompt(query))],
                &[],
                &GenerationParams::for_model(model.clone()),
            )
            .await;
        match reply {
            Ok(msg) => match parse_planner_reply(&msg.content) {
                Some(enabled) => (enabled, "planner".to_string()),
                None => {
                    debug!("planner reply unparseable — failing safe to skip");
                    (false, "planner_parse_failure".to_string())
                }
            },
            Err(e) => {
                warn!(error = %e, "planner call failed — failing safe to skip");
                (false, "planner_parse_failure".to_string())
            }
        }
    }

    async fn run_shortlist(
        &self,
        subqueries: &[String],
        preloaded: &[CorpusHandle],
    ) -> Vec<ScoredCandidate> {
        let mut hits = Vec::new();
        for query in subqueries.iter().take(MAX_SUBQUERIES) {
            match self.searcher.search(query, self.config.shortlist_budget * 2).await {
                Ok(batch) => hits.extend(batch),
                Err(e) => warn!(query = %query, error = %e, "web search failed"),
            }
        }

        let corpus_ids: HashSet<String> = preloaded
            .iter()
            .map(|h| h.document_id.clone())
            .collect();
        score_candidates(
            &subqueries.first().cloned().unwrap_or_default(),
            &hits,
            &corpus_ids,
            self.config.shortlist_budget,
        )
    }

    /// One deterministic hybrid retrieval against the preloaded sources.
    async fn bootstrap_retrieval(
        &self,
        query: &str,
        preloaded: &[CorpusHandle],
    ) -> Result<Vec<EvidenceSnippet>> {
        let vectors = self.embedder.embed(&[query.to_string()]).await?;
        let query_vector = vectors.into_iter().next().unwrap_or_default();

        let filters = SearchFilters::documents(
            preloaded.iter().map(|h| h.document_id.clone()),
        );
        let ranked = self
            .index
            .search(query, &query_vector, &filters, BOOTSTRAP_K)?;

        Ok(ranked
            .into_iter()
            .map(|r| {
                let handle = match &r.chunk.section_id {
                    Some(s) => CorpusHandle::with_section(r.chunk.document_id.clone(), s.clone()),
                    None => CorpusHandle::new(r.chunk.document_id.clone()),
                };
                EvidenceSnippet {
                    handle,
                    text: r.chunk.text,
                    score: r.score,
                }
            })
            .collect())
    }

    /// Distill retrieved chunks into atomic facts with the interface model.
    async fn extract_evidence(
        &self,
        query: &str,
        evidence: &[EvidenceSnippet],
    ) -> Option<Vec<EvidenceSnippet>> {
        let (llm, model) = self.interface_llm.as_ref()?;

        let corpus: String = evidence
            .iter()
            .map(|e| format!("[{}] {}", e.handle, e.text))
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = format!(
            "Extract the facts from these snippets that bear on the question. \
             Return ONLY a JSON array of short strings, at most 5 items.\n\n\
             Question: {query}\n\nSnippets:\n{corpus}"
        );

        let reply = llm
            .chat(
                &[ChatMessage::user(prompt)],
                &[],
                &GenerationParams::for_model(model.clone()),
            )
            .await
            .ok()?;

        let raw = reply.content.trim();
        let json = match (raw.find('['), raw.rfind(']')) {
            (Some(s), Some(e)) if e >= s => &raw[s..=e],
            _ => raw,
        };
        let facts: Vec<String> = serde_json::from_str(json).ok()?;

        let fallback_handle = evidence
            .first()
            .map(|e| e.handle.document())
            .unwrap_or_else(|| CorpusHandle::new("evidence"));
        Some(
            facts
                .into_iter()
                .map(|text| EvidenceSnippet {
                    handle: fallback_handle.clone(),
                    text,
                    score: 1.0,
                })
                .collect(),
        )
    }
}
