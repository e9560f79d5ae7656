//! Built-in tools exposed to the model.

use std::sync::Arc;

use async_trait::async_trait;

use sibyl_adapters::{
    ChatMessage, EmbeddingAdapter, FetchRequest, Fetcher, GenerationParams, LlmAdapter,
    WebSearcher,
};
use sibyl_core::types::ToolOutput;
use sibyl_core::CorpusHandle;
use sibyl_hooks::{HookContext, HookPoint};
use sibyl_index::{Chunk, SearchFilters, VectorIndex};

use super::build::ToolContext;
use super::ToolExec;

fn str_arg(args: &serde_json::Value, key: &str) -> Option<String> {
    args.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

fn object_schema(props: serde_json::Value, required: &[&str]) -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": props,
        "required": required,
    })
}

// ---------------------------------------------------------------------------
// web_search
// ---------------------------------------------------------------------------

pub struct WebSearchTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl ToolExec for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web and return titles, URLs, and snippets"
    }

    fn parameters(&self) -> serde_json::Value {
        object_schema(
            serde_json::json!({
                "query": { "type": "string", "description": "Search query" },
            }),
            &["query"],
        )
    }

    fn guideline(&self) -> Option<&str> {
        Some("search before fetching; prefer authoritative sources")
    }

    fn is_acquisition(&self) -> bool {
        true
    }

    async fn execute(&self, args: serde_json::Value) -> ToolOutput {
        let Some(query) = str_arg(&args, "query") else {
            return ToolOutput::error("missing required parameter 'query'");
        };

        match self.ctx.searcher.search(&query, 8).await {
            Ok(hits) if hits.is_empty() => ToolOutput::success("no results"),
            Ok(hits) => {
                let cap = self.ctx.limits.search_snippet_max_chars;
                let rendered: Vec<String> = hits
                    .iter()
                    .map(|h| {
                        let snippet: String = h.snippet.chars().take(cap).collect();
                        format!("{} — {}\n  {}", h.title, h.url, snippet)
                    })
                    .collect();
                ToolOutput::success(rendered.join("\n"))
            }
            Err(e) => ToolOutput::error(format!("web search failed: {e}")),
        }
    }
}

// ---------------------------------------------------------------------------
// fetch_url
// ---------------------------------------------------------------------------

pub struct FetchUrlTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl ToolExec for FetchUrlTool {
    fn name(&self) -> &str {
        "fetch_url"
    }

    fn description(&self) -> &str {
        "Fetch a URL and return its text content"
    }

    fn parameters(&self) -> serde_json::Value {
        object_schema(
            serde_json::json!({
                "url": { "type": "string" },
                "include_links": { "type": "boolean" },
            }),
            &["url"],
        )
    }

    fn is_acquisition(&self) -> bool {
        true
    }

    async fn execute(&self, args: serde_json::Value) -> ToolOutput {
        let Some(url) = str_arg(&args, "url") else {
            return ToolOutput::error("missing required parameter 'url'");
        };
        let include_links = args
            .get("include_links")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        // First subscriber to set a replacement result wins.
        let mut hook_ctx = HookContext::new(
            HookPoint::FetchUrlOverride,
            serde_json::json!({ "url": url }),
        );
        self.ctx.kernel.fire(&mut hook_ctx);
        if let Some(replacement) = hook_ctx.fetch_override {
            let text = replacement
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| replacement.to_string());
            return ToolOutput::success(text);
        }

        let request = FetchRequest {
            url,
            format: Default::default(),
            include_links,
            max_links: self.ctx.limits.max_url_detail_links,
        };
        match self.ctx.fetcher.fetch(&request).await {
            Ok(page) => {
                let mut out = String::new();
                if let Some(title) = &page.title {
                    out.push_str(&format!("# {title}\n\n"));
                }
                out.push_str(&page.content_text);
                if include_links && !page.links.is_empty() {
                    out.push_str("\n\nLinks:\n");
                    for link in &page.links {
                        out.push_str(&format!("- {link}\n"));
                    }
                }
                ToolOutput::success(out)
            }
            Err(e) => ToolOutput::error(format!("fetch failed: {e}")),
        }
    }
}

// ---------------------------------------------------------------------------
// retrieve_chunks
// ---------------------------------------------------------------------------

pub struct RetrieveChunksTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl ToolExec for RetrieveChunksTool {
    fn name(&self) -> &str {
        "retrieve_chunks"
    }

    fn description(&self) -> &str {
        "Hybrid-search the preloaded corpus and return the best matching passages"
    }

    fn parameters(&self) -> serde_json::Value {
        object_schema(
            serde_json::json!({
                "query": { "type": "string" },
                "k": { "type": "integer", "minimum": 1, "maximum": 20 },
                "documents": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Optional corpus handles to restrict the search to",
                },
            }),
            &["query"],
        )
    }

    fn guideline(&self) -> Option<&str> {
        Some("cite passages by their corpus:// handle")
    }

    async fn execute(&self, args: serde_json::Value) -> ToolOutput {
        let Some(query) = str_arg(&args, "query") else {
            return ToolOutput::error("missing required parameter 'query'");
        };
        let k = args.get("k").and_then(|v| v.as_u64()).unwrap_or(5).min(20) as usize;

        let filters = match args.get("documents").and_then(|v| v.as_array()) {
            Some(handles) if !handles.is_empty() => {
                let ids: Vec<String> = handles
                    .iter()
                    .filter_map(|h| h.as_str())
                    .filter_map(|h| {
                        CorpusHandle::parse(h)
                            .map(|p| p.document_id)
                            .or_else(|| Some(h.to_string()))
                    })
                    .collect();
                SearchFilters::documents(ids)
            }
            _ => SearchFilters::default(),
        };

        let vectors = match self.ctx.embedder.embed(&[query.clone()]).await {
            Ok(v) => v,
            Err(e) => return ToolOutput::error(format!("embedding failed: {e}")),
        };
        let query_vector = vectors.into_iter().next().unwrap_or_default();

        match self.ctx.index.search(&query, &query_vector, &filters, k) {
            Ok(hits) if hits.is_empty() => ToolOutput::success("no matching passages"),
            Ok(hits) => {
                let rendered: Vec<String> = hits
                    .iter()
                    .map(|h| format!("[{}] {}", h.chunk.provenance, h.chunk.text))
                    .collect();
                ToolOutput::success(rendered.join("\n\n"))
            }
            Err(e) => ToolOutput::error(format!("retrieval failed: {e}")),
        }
    }
}

// ---------------------------------------------------------------------------
// save_memory
// ---------------------------------------------------------------------------

pub struct SaveMemoryTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl ToolExec for SaveMemoryTool {
    fn name(&self) -> &str {
        "save_memory"
    }

    fn description(&self) -> &str {
        "Store a lasting fact about the user"
    }

    fn parameters(&self) -> serde_json::Value {
        object_schema(
            serde_json::json!({
                "text": { "type": "string", "description": "The fact to remember" },
            }),
            &["text"],
        )
    }

    fn guideline(&self) -> Option<&str> {
        Some("only save durable user facts, never transient task state")
    }

    async fn execute(&self, args: serde_json::Value) -> ToolOutput {
        let Some(text) = str_arg(&args, "text") else {
            return ToolOutput::error("missing required parameter 'text'");
        };

        let vectors = match self.ctx.embedder.embed(&[text.clone()]).await {
            Ok(v) => v,
            Err(e) => return ToolOutput::error(format!("embedding failed: {e}")),
        };
        let vector = vectors.into_iter().next().unwrap_or_default();

        match self.ctx.store.save_memory(&text, &vector) {
            Ok((_, true)) => ToolOutput::success("updated an existing similar memory"),
            Ok((id, false)) => ToolOutput::success(format!("memory saved (id {id})")),
            Err(e) => ToolOutput::error(format!("memory save failed: {e}")),
        }
    }
}

// ---------------------------------------------------------------------------
// save_finding
// ---------------------------------------------------------------------------

pub struct SaveFindingTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl ToolExec for SaveFindingTool {
    fn name(&self) -> &str {
        "save_finding"
    }

    fn description(&self) -> &str {
        "Record a research finding scoped to this session"
    }

    fn parameters(&self) -> serde_json::Value {
        object_schema(
            serde_json::json!({
                "text": { "type": "string" },
                "source": { "type": "string", "description": "Corpus handle the finding came from" },
            }),
            &["text"],
        )
    }

    async fn execute(&self, args: serde_json::Value) -> ToolOutput {
        let Some(text) = str_arg(&args, "text") else {
            return ToolOutput::error("missing required parameter 'text'");
        };
        let Some(session_id) = self.ctx.session_id else {
            return ToolOutput::error("no session bound — findings need a session");
        };
        let source = str_arg(&args, "source").and_then(|s| CorpusHandle::parse(&s));

        if let Err(e) = self.ctx.store.add_finding(session_id, &text, source.as_ref()) {
            return ToolOutput::error(format!("finding save failed: {e}"));
        }

        // Findings are also indexed so later retrieval can surface them.
        let doc_id = VectorIndex::findings_document_id(session_id);
        let ordinal = self.ctx.index.document_chunk_count(&doc_id) as u32;
        let vector = match self.ctx.embedder.embed(&[text.clone()]).await {
            Ok(mut v) => v.pop().unwrap_or_default(),
            Err(e) => return ToolOutput::error(format!("embedding failed: {e}")),
        };
        let chunk = Chunk {
            document_id: doc_id.clone(),
            ordinal,
            token_count: sibyl_adapters::approx_tokens(&text),
            provenance: source
                .map(|h| h.to_string())
                .unwrap_or_else(|| format!("corpus://cache/{doc_id}")),
            section_id: None,
            text,
            vector,
        };
        match self.ctx.index.upsert_chunks(&doc_id, &[chunk]) {
            Ok(()) => ToolOutput::success("finding recorded"),
            Err(e) => ToolOutput::error(format!("finding indexing failed: {e}")),
        }
    }
}

// ---------------------------------------------------------------------------
// list_sections
// ---------------------------------------------------------------------------

pub struct ListSectionsTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl ToolExec for ListSectionsTool {
    fn name(&self) -> &str {
        "list_sections"
    }

    fn description(&self) -> &str {
        "List the sections of a corpus document"
    }

    fn parameters(&self) -> serde_json::Value {
        object_schema(
            serde_json::json!({
                "document": { "type": "string", "description": "Corpus handle or document id" },
            }),
            &["document"],
        )
    }

    async fn execute(&self, args: serde_json::Value) -> ToolOutput {
        let Some(doc) = str_arg(&args, "document") else {
            return ToolOutput::error("missing required parameter 'document'");
        };
        let document_id = CorpusHandle::parse(&doc)
            .map(|h| h.document_id)
            .unwrap_or(doc);

        let sections = self.ctx.index.document_sections(&document_id);
        if sections.is_empty() {
            return ToolOutput::success("document has no labeled sections");
        }
        let rendered: Vec<String> = sections
            .iter()
            .map(|s| CorpusHandle::with_section(document_id.clone(), s.clone()).to_string())
            .collect();
        ToolOutput::success(rendered.join("\n"))
    }
}

// ---------------------------------------------------------------------------
// summarize_section
// ---------------------------------------------------------------------------

pub struct SummarizeSectionTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl ToolExec for SummarizeSectionTool {
    fn name(&self) -> &str {
        "summarize_section"
    }

    fn description(&self) -> &str {
        "Summarize one document section (or the whole document)"
    }

    fn parameters(&self) -> serde_json::Value {
        object_schema(
            serde_json::json!({
                "document": { "type": "string", "description": "Corpus handle, optionally with #section=" },
            }),
            &["document"],
        )
    }

    async fn execute(&self, args: serde_json::Value) -> ToolOutput {
        let Some(doc) = str_arg(&args, "document") else {
            return ToolOutput::error("missing required parameter 'document'");
        };
        let handle = CorpusHandle::parse(&doc).unwrap_or_else(|| CorpusHandle::new(doc));

        let Some(text) = self
            .ctx
            .index
            .document_text(&handle.document_id, handle.section_id.as_deref())
        else {
            return ToolOutput::error(format!("no content for {handle}"));
        };

        match &self.ctx.summarizer {
            Some((llm, model)) => {
                let prompt = format!("Summarize this text concisely:\n\n{text}");
                match llm
                    .chat(
                        &[ChatMessage::user(prompt)],
                        &[],
                        &GenerationParams::for_model(model.clone()),
                    )
                    .await
                {
                    Ok(reply) => ToolOutput::success(reply.content),
                    Err(e) => ToolOutput::error(format!("summarization failed: {e}")),
                }
            }
            // No summarization model configured: return the raw section,
            // truncated, and let the main model digest it.
            None => {
                let capped: String = text.chars().take(8000).collect();
                ToolOutput::success(capped)
            }
        }
    }
}
