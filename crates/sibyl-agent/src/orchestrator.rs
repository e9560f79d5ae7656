//! The turn orchestrator: session resolution → preload → prompt assembly →
//! bounded LLM ↔ tool loop → persistence → lifecycle events.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sibyl_adapters::{
    ChatMessage, EmbeddingAdapter, Fetcher, GenerationParams, LlmAdapter, LlmErrorKind,
    WebSearcher,
};
use sibyl_core::config::SibylConfig;
use sibyl_core::events::{SharedSink, TurnEvent};
use sibyl_core::types::{
    answer_title, ContextResolution, ResearchProfile, Role, SessionResolution, TurnMessage,
    TurnRequest, TurnResult,
};
use sibyl_hooks::{HookContext, HookKernel, HookPoint};
use sibyl_index::VectorIndex;
use sibyl_research::{PreloadOutcome, PreloadPipeline, ResearchError};
use sibyl_sessions::{Compactor, ResolveOutcome, SessionResolver};
use sibyl_store::{HistoryStore, SessionRow};

use crate::error::AgentError;
use crate::prompt::{self, PromptInputs};
use crate::redact::redact_local_paths;
use crate::summarize;
use crate::tools::{build_registry, CommandRunner, ToolContext, ToolRegistry};

/// Everything the orchestrator needs, wired once at startup.
pub struct OrchestratorDeps {
    pub config: SibylConfig,
    pub store: Arc<HistoryStore>,
    pub index: Arc<VectorIndex>,
    pub embedder: Arc<dyn EmbeddingAdapter>,
    pub searcher: Arc<dyn WebSearcher>,
    pub fetcher: Arc<dyn Fetcher>,
    /// Main chat model, already wrapped with transient-retry.
    pub llm: Arc<dyn LlmAdapter>,
    /// Summarization model for turn summaries, compaction and
    /// `summarize_section`; `None` disables those paths.
    pub summarizer: Option<(Arc<dyn LlmAdapter>, String)>,
    pub kernel: Arc<HookKernel>,
    pub resolver: SessionResolver,
    pub preload: PreloadPipeline,
    pub compactor: Arc<Compactor>,
    pub runner: Arc<dyn CommandRunner>,
    pub sink: SharedSink,
}

pub struct Orchestrator {
    deps: OrchestratorDeps,
}

/// Memories injected into the prompt per turn.
const MEMORY_RECALL_K: usize = 5;
/// Direct-answer mode requires the seed content to fit in this share of the
/// model window.
const DIRECT_ANSWER_BUDGET_SHARE: f64 = 0.5;

impl Orchestrator {
    pub fn new(deps: OrchestratorDeps) -> Result<Self, AgentError> {
        if deps.config.max_turns == 0 {
            return Err(AgentError::Config("max_turns must be at least 1".into()));
        }
        Ok(Self { deps })
    }

    pub fn kernel(&self) -> &Arc<HookKernel> {
        &self.deps.kernel
    }

    /// Run one turn.
    ///
    /// Raises only `ContextOverflow` (with a compacted fallback message set);
    /// every other failure folds into a halted `TurnResult` or a tool error
    /// payload the model sees.
    pub async fn run_turn(
        &self,
        request: TurnRequest,
        cancel: Option<CancellationToken>,
    ) -> Result<TurnResult, AgentError> {
        let d = &self.deps;
        d.sink.emit(
            TurnEvent::RunStart,
            serde_json::json!({ "query_len": request.query_text.len(), "lean": request.lean }),
        );

        // ------------------------------------------------------------------
        // Session resolution
        // ------------------------------------------------------------------
        let resolved = match d.resolver.resolve(&request) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "session resolution failed");
                return Ok(self.finish(TurnResult::halted(format!("session_error: {e}"))));
            }
        };

        let mut session: Option<SessionRow> = None;
        let mut effective = ResearchProfile::default();
        let mut continued_context: Option<String> = None;
        let mut context_resolution = ContextResolution::None;
        let mut session_resolution = SessionResolution::Stateless;

        match resolved {
            ResolveOutcome::Ambiguous { term, candidates } => {
                let mut result = TurnResult::halted("ambiguous_resume");
                result.notices.push(format!(
                    "resume term '{term}' matched {} sessions",
                    candidates.len()
                ));
                for c in &candidates {
                    result.notices.push(format!("{}: {}", c.id, c.name));
                }
                result.resume_candidates = candidates;
                return Ok(self.finish(result));
            }
            ResolveOutcome::NotFound { term } => {
                let mut result = TurnResult::halted("session_not_found");
                result.notices.push(format!("no session matched '{term}'"));
                return Ok(self.finish(result));
            }
            ResolveOutcome::Bound {
                session: s,
                resolution,
                effective: eff,
            } => {
                session_resolution = resolution;
                effective = eff;
                session = Some(s);
            }
            ResolveOutcome::ContextOnly { context, count } => {
                context_resolution = ContextResolution::ContinueIds { count };
                continued_context = Some(context);
                // Request-level research overrides still apply without a session.
                effective = sibyl_sessions::effective_profile(&request, &ResearchProfile::default());
            }
            ResolveOutcome::Stateless => {
                effective = sibyl_sessions::effective_profile(&request, &ResearchProfile::default());
            }
        }

        let session_id = session_resolution.session_id();
        {
            let mut ctx = HookContext::new(
                HookPoint::SessionResolved,
                serde_json::json!({
                    "session_id": session_id,
                    "resolution": session_resolution,
                }),
            );
            d.kernel.fire(&mut ctx);
        }
        d.sink.emit(
            TurnEvent::SessionResolved,
            serde_json::json!({ "session_id": session_id }),
        );

        // Shell binding persists so the next CLI call in this shell sticks.
        if let (Some(pid), Some(sid)) = (request.shell_session_id, session_id) {
            let _ = d.resolver.sticky().bind(pid, sid);
        }

        // ------------------------------------------------------------------
        // Preload
        // ------------------------------------------------------------------
        {
            let mut ctx = HookContext::new(
                HookPoint::PrePreload,
                serde_json::json!({
                    "research_mode": effective.research_mode,
                    "source_count": request.additional_source_context.len(),
                }),
            );
            d.kernel.fire(&mut ctx);
        }
        d.sink.emit(TurnEvent::PreloadStart, serde_json::json!({}));

        // Lean suppresses every preload side effect; the pipeline is not run.
        let preload: PreloadOutcome = if request.lean {
            let mut outcome = PreloadOutcome::default();
            outcome.resolution.shortlist_reason = "lean".to_string();
            outcome
        } else {
            match d.preload.run(&request, &effective, session_id).await {
                Ok(outcome) => outcome,
                Err(ResearchError::CorpusMissing) => {
                    let mut result = TurnResult::halted(
                        "corpus_missing: expected local corpus, zero local documents ingested",
                    );
                    result.session_id = session_id;
                    result.session_resolution = Some(session_resolution);
                    return Ok(self.finish(result));
                }
                Err(e) => {
                    let mut result = TurnResult::halted(format!("preload_error: {e}"));
                    result.session_id = session_id;
                    return Ok(self.finish(result));
                }
            }
        };

        {
            let mut ctx = HookContext::new(
                HookPoint::PostPreload,
                serde_json::json!({
                    "is_corpus_preloaded": preload.resolution.is_corpus_preloaded,
                    "shortlist_enabled": preload.resolution.shortlist_enabled,
                    "shortlist_reason": preload.resolution.shortlist_reason,
                }),
            );
            d.kernel.fire(&mut ctx);
        }
        d.sink.emit(
            TurnEvent::PreloadEnd,
            serde_json::json!({
                "is_corpus_preloaded": preload.resolution.is_corpus_preloaded,
                "shortlist_enabled": preload.resolution.shortlist_enabled,
            }),
        );

        // A reset clears the persisted shortlist preference for good.
        if request.shortlist_override == sibyl_core::types::ShortlistOverride::Reset {
            effective.shortlist_override = None;
        }

        // Persist profile changes: explicit overrides stick, and fresh
        // source pointers REPLACE the stored list.
        if let (Some(sid), Some(_)) = (session_id, session.as_ref()) {
            let explicit_override =
                request.research_mode.is_some() || request.research_source_mode.is_some();
            if explicit_override || !preload.fresh_handles.is_empty() {
                let mut updated = effective.clone();
                if !preload.fresh_handles.is_empty() {
                    updated.corpus_pointers = preload.fresh_handles.clone();
                }
                if let Err(e) = d.store.update_session_research_profile(sid, &updated) {
                    warn!(error = %e, "profile persistence failed");
                }
                effective = updated;
            }
        }

        // ------------------------------------------------------------------
        // Tool registry
        // ------------------------------------------------------------------
        let direct_answer = self.direct_answer_mode(&request, &effective, &preload);
        // With no shortlist and a preloaded corpus, a research turn answers
        // from what it has; acquisition tools only invite drift.
        let suppress_acquisition = direct_answer
            || (effective.research_mode
                && preload.resolution.is_corpus_preloaded
                && !preload.resolution.shortlist_enabled);

        let registry: ToolRegistry = if request.lean {
            ToolRegistry::new()
        } else {
            let tool_ctx = Arc::new(ToolContext {
                store: Arc::clone(&d.store),
                index: Arc::clone(&d.index),
                embedder: Arc::clone(&d.embedder),
                searcher: Arc::clone(&d.searcher),
                fetcher: Arc::clone(&d.fetcher),
                kernel: Arc::clone(&d.kernel),
                summarizer: d.summarizer.clone(),
                session_id,
                limits: d.config.limits.clone(),
            });
            build_registry(
                tool_ctx,
                &d.config.custom_tools,
                Arc::clone(&d.runner),
                &d.config.disabled_tools,
                suppress_acquisition,
            )
        };

        // ------------------------------------------------------------------
        // Prompt assembly
        // ------------------------------------------------------------------
        let memories = if request.lean {
            Vec::new()
        } else {
            self.recall_memories(&request.query_text).await
        };

        let history_rows = match (&session, session_id) {
            (Some(_), Some(sid)) => d
                .store
                .session_messages_since_compaction(sid)
                .unwrap_or_default(),
            _ => Vec::new(),
        };
        if let Some(s) = &session {
            context_resolution = ContextResolution::SessionHistory {
                message_count: history_rows.len(),
                compacted: s.compacted_summary.is_some(),
            };
        }

        let continued_context = match (&continued_context, request.summarize_context) {
            (Some(ctx), true) => Some(self.maybe_summarize_context(ctx).await),
            (Some(ctx), false) => Some(ctx.clone()),
            (None, _) => None,
        };

        let inputs = PromptInputs {
            tool_guidelines: registry.guidelines(),
            memories,
            compacted_summary: session.as_ref().and_then(|s| s.compacted_summary.as_deref()),
            continued_context: continued_context.as_deref(),
            preload: &preload.resolution,
            direct_answer,
        };
        let mut system = prompt::system_prompt(&inputs);
        system = d.kernel.extend_prompt(system);
        prompt::context_blocks(&mut system, &inputs);

        let redacted_query = redact_local_paths(
            &request.query_text,
            &d.config.research.local_document_roots,
        );

        let mut messages: Vec<ChatMessage> = vec![ChatMessage::system(system)];
        messages.extend(prompt::history_messages(&history_rows));
        messages.push(prompt::user_message(
            &redacted_query,
            &preload.resolution.bootstrap_evidence,
        ));

        let mut transcript: Vec<TurnMessage> = vec![TurnMessage {
            role: Role::User,
            content: redacted_query.clone(),
        }];

        // ------------------------------------------------------------------
        // Tool loop
        // ------------------------------------------------------------------
        let max_turns = request
            .max_turns_override
            .or_else(|| session.as_ref().and_then(|s| s.max_turns_override))
            .unwrap_or(d.config.max_turns);
        let model = request
            .model_override
            .clone()
            .or_else(|| session.as_ref().and_then(|s| s.default_model.clone()))
            .unwrap_or_else(|| d.config.default_model.clone());
        let params = GenerationParams {
            model: model.clone(),
            max_tokens: d.config.llm.max_tokens,
            temperature: None,
        };
        let schemas = registry.schemas();

        let mut turn: u32 = 0;
        let final_answer = loop {
            if cancelled(&cancel) {
                let mut result = TurnResult::halted("cancelled");
                result.notices.push("turn cancelled; partial tool results discarded".into());
                result.session_id = session_id;
                return Ok(self.finish(result));
            }

            {
                let mut ctx = HookContext::new(
                    HookPoint::PreLlmCall,
                    serde_json::json!({
                        "turn": turn,
                        "message_count": messages.len(),
                        "tool_count": schemas.len(),
                    }),
                );
                d.kernel.fire(&mut ctx);
            }
            d.sink
                .emit(TurnEvent::LlmStart, serde_json::json!({ "turn": turn }));

            let response = match d.llm.chat(&messages, &schemas, &params).await {
                Ok(r) => r,
                Err(e) if e.kind == LlmErrorKind::ContextOverflow => {
                    return Err(AgentError::ContextOverflow {
                        fallback: compacted_fallback(&messages),
                    });
                }
                Err(e) => {
                    warn!(error = %e, "LLM call failed");
                    let mut result = TurnResult::halted(format!("llm_error: {}", e.message));
                    result.session_id = session_id;
                    return Ok(self.finish(result));
                }
            };

            {
                let names: Vec<&str> =
                    response.tool_calls.iter().map(|c| c.name.as_str()).collect();
                let mut ctx = HookContext::new(
                    HookPoint::PostLlmResponse,
                    serde_json::json!({
                        "turn": turn,
                        "content_len": response.content.len(),
                        "tool_calls": names,
                    }),
                );
                d.kernel.fire(&mut ctx);
            }
            d.sink.emit(
                TurnEvent::LlmEnd,
                serde_json::json!({
                    "turn": turn,
                    "has_tool_calls": response.has_tool_calls(),
                }),
            );

            if !response.has_tool_calls() {
                transcript.push(TurnMessage {
                    role: Role::Assistant,
                    content: response.content.clone(),
                });
                break response.content;
            }

            if !response.content.is_empty() {
                transcript.push(TurnMessage {
                    role: Role::Assistant,
                    content: response.content.clone(),
                });
            }
            let calls = response.tool_calls.clone();
            messages.push(response);

            // Dispatch in the order the model provided.
            for call in &calls {
                if cancelled(&cancel) {
                    let mut result = TurnResult::halted("cancelled");
                    result
                        .notices
                        .push("turn cancelled; partial tool results discarded".into());
                    result.session_id = session_id;
                    return Ok(self.finish(result));
                }

                d.sink.emit(
                    TurnEvent::ToolStart,
                    serde_json::json!({ "name": call.name, "turn": turn }),
                );
                let output = registry.dispatch(&d.kernel, call).await;
                d.sink.emit(
                    TurnEvent::ToolEnd,
                    serde_json::json!({ "name": call.name, "is_error": output.is_error }),
                );

                transcript.push(TurnMessage {
                    role: Role::Tool,
                    content: output.content.clone(),
                });
                let content = if output.is_error {
                    format!("ERROR: {}", output.content)
                } else {
                    output.content
                };
                messages.push(ChatMessage::tool_result(call.id.clone(), content));
            }

            turn += 1;
            if turn >= max_turns {
                // Graceful exit: one tool-free call forcing a final answer.
                info!(max_turns, "turn bound reached — forcing final answer");
                messages.push(ChatMessage::user(
                    "Tool budget is exhausted. Give your final answer now from \
                     what you already have.",
                ));
                d.sink
                    .emit(TurnEvent::LlmStart, serde_json::json!({ "turn": turn, "graceful": true }));
                let response = match d.llm.chat(&messages, &[], &params).await {
                    Ok(r) => r,
                    Err(e) if e.kind == LlmErrorKind::ContextOverflow => {
                        return Err(AgentError::ContextOverflow {
                            fallback: compacted_fallback(&messages),
                        });
                    }
                    Err(e) => {
                        let mut result = TurnResult::halted(format!("llm_error: {}", e.message));
                        result.session_id = session_id;
                        return Ok(self.finish(result));
                    }
                };
                d.sink.emit(
                    TurnEvent::LlmEnd,
                    serde_json::json!({ "turn": turn, "graceful": true }),
                );
                transcript.push(TurnMessage {
                    role: Role::Assistant,
                    content: response.content.clone(),
                });
                break response.content;
            }
        };

        // ------------------------------------------------------------------
        // Persistence and background work
        // ------------------------------------------------------------------
        if request.save_history {
            self.persist_turn(&request, session.as_ref(), session_id, &model, &final_answer);
        }

        let mut result = TurnResult {
            answer_title: answer_title(&final_answer, &request.query_text),
            final_answer,
            query_summary: None,
            answer_summary: None,
            messages: transcript,
            session_id,
            halted: false,
            halt_reason: None,
            notices: Vec::new(),
            resume_candidates: Vec::new(),
            context_resolution: Some(context_resolution),
            session_resolution: Some(session_resolution),
            preload: preload.resolution,
        };
        if preload.one_shot {
            result.notices.push("one-shot summarization turn".into());
        }

        Ok(self.finish(result))
    }

    /// Direct-answer mode: seed URLs fully in context, research off.
    fn direct_answer_mode(
        &self,
        request: &TurnRequest,
        effective: &ResearchProfile,
        preload: &PreloadOutcome,
    ) -> bool {
        if effective.research_mode
            || preload.fresh_handles.is_empty()
            || request.additional_source_context.is_empty()
        {
            return false;
        }
        let all_urls = request
            .additional_source_context
            .iter()
            .all(|s| s.starts_with("http://") || s.starts_with("https://"));
        if !all_urls {
            return false;
        }

        let budget =
            (self.deps.config.model_context_window as f64 * DIRECT_ANSWER_BUDGET_SHARE) as u32;
        let total_tokens: u32 = preload
            .fresh_handles
            .iter()
            .filter_map(|h| self.deps.index.document_text(&h.document_id, None))
            .map(|t| sibyl_adapters::approx_tokens(&t))
            .sum();
        total_tokens > 0 && total_tokens <= budget
    }

    async fn recall_memories(&self, query: &str) -> Vec<String> {
        let Ok(vectors) = self.deps.embedder.embed(&[query.to_string()]).await else {
            return Vec::new();
        };
        let Some(vector) = vectors.into_iter().next() else {
            return Vec::new();
        };
        match self.deps.store.recall_memories(&vector, MEMORY_RECALL_K) {
            Ok(hits) => hits.into_iter().map(|(m, _)| m.text).collect(),
            Err(e) => {
                warn!(error = %e, "memory recall failed");
                Vec::new()
            }
        }
    }

    async fn maybe_summarize_context(&self, context: &str) -> String {
        match &self.deps.summarizer {
            Some((llm, model)) => {
                match summarize::summarize_turn(llm.as_ref(), model, "earlier context", context)
                    .await
                {
                    Some((_, summary)) if !summary.is_empty() => summary,
                    _ => context.to_string(),
                }
            }
            None => context.to_string(),
        }
    }

    /// Persist the turn. With a summarizer configured, insertion is deferred
    /// to a detached task so summaries land with the rows; the user-visible
    /// result never waits on it.
    fn persist_turn(
        &self,
        request: &TurnRequest,
        session: Option<&SessionRow>,
        session_id: Option<i64>,
        model: &str,
        answer: &str,
    ) {
        let d = &self.deps;
        let query = request.query_text.clone();
        let answer = answer.to_string();
        let model = model.to_string();
        let store = Arc::clone(&d.store);
        let compactor = Arc::clone(&d.compactor);
        let embedder = Arc::clone(&d.embedder);
        let lean = request.lean;
        let auto_extract = session.map(|s| s.memory_auto_extract).unwrap_or(false);
        let summarizer = if lean { None } else { d.summarizer.clone() };

        let query_tokens = sibyl_adapters::approx_tokens(&query);
        let answer_tokens = sibyl_adapters::approx_tokens(&answer);

        fn insert_rows(
            store: &HistoryStore,
            session_id: Option<i64>,
            query: &str,
            answer: &str,
            model: &str,
            query_tokens: u32,
            answer_tokens: u32,
            summaries: Option<(String, String)>,
        ) {
            let ids = match session_id {
                Some(sid) => {
                    let uid =
                        store.append_session_message(sid, Role::User, query, None, query_tokens);
                    let aid = store.append_session_message(
                        sid,
                        Role::Assistant,
                        answer,
                        Some(model),
                        answer_tokens,
                    );
                    uid.ok().zip(aid.ok())
                }
                None => store
                    .save_interaction(query, answer, model, query_tokens, answer_tokens)
                    .ok()
                    .map(|aid| (aid - 1, aid)),
            };
            if let (Some((uid, aid)), Some((qs, ans))) = (ids, summaries) {
                let _ = store.attach_summary(uid, &qs);
                let _ = store.attach_summary(aid, &ans);
            }
        }

        match summarizer {
            None => {
                // No summaries to wait on: persist synchronously, then
                // compact in the background.
                insert_rows(
                    &store,
                    session_id,
                    &query,
                    &answer,
                    &model,
                    query_tokens,
                    answer_tokens,
                    None,
                );
                if let Some(sid) = session_id {
                    if !lean {
                        tokio::spawn(async move {
                            if let Err(e) = compactor.compact_if_needed(sid).await {
                                warn!(error = %e, "compaction failed");
                            }
                        });
                    }
                }
            }
            Some((llm, summary_model)) => {
                // History insertion waits for the summaries (bounded) on a
                // detached task; the answer is already on its way back.
                tokio::spawn(async move {
                    let summaries = tokio::time::timeout(
                        summarize::SUMMARY_TIMEOUT,
                        summarize::summarize_turn(llm.as_ref(), &summary_model, &query, &answer),
                    )
                    .await
                    .ok()
                    .flatten();

                    insert_rows(
                        &store,
                        session_id,
                        &query,
                        &answer,
                        &model,
                        query_tokens,
                        answer_tokens,
                        summaries,
                    );

                    if auto_extract {
                        summarize::extract_memories(
                            llm.as_ref(),
                            &summary_model,
                            &embedder,
                            &store,
                            &query,
                            &answer,
                        )
                        .await;
                    }
                    if let Some(sid) = session_id {
                        if let Err(e) = compactor.compact_if_needed(sid).await {
                            warn!(error = %e, "compaction failed");
                        }
                    }
                });
            }
        }
    }

    /// Single exit point: fire `TURN_COMPLETED` exactly once and close the
    /// event stream. `POST_TURN_RENDER` belongs to the embedding frontend.
    fn finish(&self, result: TurnResult) -> TurnResult {
        let d = &self.deps;
        let mut ctx = HookContext::new(
            HookPoint::TurnCompleted,
            serde_json::json!({
                "halted": result.halted,
                "halt_reason": result.halt_reason,
                "session_id": result.session_id,
                "answer_title": result.answer_title,
                "notices": result.notices,
            }),
        );
        d.kernel.fire(&mut ctx);

        d.sink.emit(
            TurnEvent::TurnCompleted,
            serde_json::json!({ "halted": result.halted }),
        );
        d.sink.emit(TurnEvent::RunEnd, serde_json::json!({}));
        debug!(halted = result.halted, "turn finished");
        result
    }
}

fn cancelled(cancel: &Option<CancellationToken>) -> bool {
    cancel.as_ref().map(|c| c.is_cancelled()).unwrap_or(false)
}

/// Fallback message set for a context-overflow retry: the system prompt and
/// the last user message survive; the middle is dropped.
fn compacted_fallback(messages: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut fallback = Vec::new();
    if let Some(first) = messages.first() {
        if first.role == Role::System {
            fallback.push(first.clone());
        }
    }
    if let Some(last_user) = messages.iter().rev().find(|m| m.role == Role::User) {
        fallback.push(last_user.clone());
    }
    fallback
}
