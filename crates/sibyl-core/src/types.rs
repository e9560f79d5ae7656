use serde::{Deserialize, Serialize};
use std::fmt;

use crate::handle::CorpusHandle;
use crate::selector::Selector;

/// Message role as persisted and as sent to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
            Role::System => "system",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "tool" => Ok(Role::Tool),
            "system" => Ok(Role::System),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Where a research session draws its sources from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    WebOnly,
    LocalOnly,
    Mixed,
    #[default]
    None,
}

impl SourceMode {
    /// Modes that require a usable local corpus before the turn may proceed.
    pub fn requires_local_corpus(&self) -> bool {
        matches!(self, SourceMode::LocalOnly | SourceMode::Mixed)
    }
}

impl std::str::FromStr for SourceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "web_only" => Ok(SourceMode::WebOnly),
            "local_only" => Ok(SourceMode::LocalOnly),
            "mixed" => Ok(SourceMode::Mixed),
            "none" => Ok(SourceMode::None),
            other => Err(format!("unknown source mode: {other}")),
        }
    }
}

/// Per-turn shortlist override, layered above the session-level setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ShortlistOverride {
    On,
    Off,
    #[default]
    Auto,
    /// Clear the persisted session override, then behave as `Auto`.
    Reset,
}

/// A session's research settings.
///
/// Invariant: `source_mode` is `None` exactly when `research_mode` is false.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ResearchProfile {
    pub research_mode: bool,
    pub source_mode: SourceMode,
    /// Ordered, opaque corpus handles. Assigning new pointers on an existing
    /// session replaces this list, it never appends.
    pub corpus_pointers: Vec<CorpusHandle>,
    /// Persisted shortlist preference; `None` means no session override.
    pub shortlist_override: Option<bool>,
}

impl ResearchProfile {
    pub fn research(source_mode: SourceMode, pointers: Vec<CorpusHandle>) -> Self {
        Self {
            research_mode: true,
            source_mode,
            corpus_pointers: pointers,
            shortlist_override: None,
        }
    }
}

/// One invocation's immutable input.
#[derive(Debug, Clone, Default)]
pub struct TurnRequest {
    pub query_text: String,
    /// History ids to assemble context from, without binding a session.
    pub continue_ids: Option<Selector>,
    /// Summarize the loaded context instead of sending it verbatim.
    pub summarize_context: bool,
    /// Create-or-bind a session by this exact name.
    pub sticky_session_name: Option<String>,
    /// Resume by id, exact name, then partial name.
    pub resume_session_term: Option<String>,
    /// Shell PID for sticky-session lock lookup.
    pub shell_session_id: Option<u32>,
    /// Lean mode: no tools, no preload side effects, no memory recall.
    pub lean: bool,
    pub save_history: bool,
    /// Extra source pointers for this turn (paths or URLs, pre-redaction).
    pub additional_source_context: Vec<String>,
    /// Explicit research override; absent means the session profile applies.
    pub research_mode: Option<bool>,
    pub research_source_mode: Option<SourceMode>,
    pub shortlist_override: ShortlistOverride,
    pub model_override: Option<String>,
    pub max_turns_override: Option<u32>,
}

impl TurnRequest {
    pub fn query(text: impl Into<String>) -> Self {
        Self {
            query_text: text.into(),
            save_history: true,
            ..Default::default()
        }
    }
}

/// How the turn's conversational context was obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextResolution {
    None,
    ContinueIds { count: usize },
    SessionHistory { message_count: usize, compacted: bool },
}

/// How the session was bound for the turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionResolution {
    Stateless,
    Created { id: i64 },
    Resumed { id: i64 },
    ShellSticky { id: i64 },
}

impl SessionResolution {
    pub fn session_id(&self) -> Option<i64> {
        match self {
            SessionResolution::Stateless => None,
            SessionResolution::Created { id }
            | SessionResolution::Resumed { id }
            | SessionResolution::ShellSticky { id } => Some(*id),
        }
    }
}

/// Minimal session descriptor used in notices and listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionBrief {
    pub id: i64,
    pub name: String,
}

/// One evidence snippet produced by bootstrap retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceSnippet {
    pub handle: CorpusHandle,
    pub text: String,
    pub score: f32,
}

/// Outcome of the preload pipeline, carried in the `TurnResult`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreloadResolution {
    pub shortlist_enabled: bool,
    /// Which policy rule decided the shortlist, e.g. "lean", "session_override".
    pub shortlist_reason: String,
    /// Usable corpus exists for this turn — freshly ingested or already
    /// resolvable from the session's stored pointers.
    pub is_corpus_preloaded: bool,
    pub preloaded_source_handles: Vec<CorpusHandle>,
    #[serde(default)]
    pub bootstrap_evidence: Vec<EvidenceSnippet>,
    /// Free-form policy diagnostics for operators.
    pub diagnostics: Vec<String>,
}

/// Result of executing one tool: ok text or an error message the model sees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            is_error: true,
        }
    }
}

/// One message the turn produced or consumed, in model order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnMessage {
    pub role: Role,
    pub content: String,
}

/// Outcome of one turn.
#[derive(Debug, Clone, Default)]
pub struct TurnResult {
    pub final_answer: String,
    /// First markdown heading of the answer, else the query text.
    pub answer_title: String,
    pub query_summary: Option<String>,
    pub answer_summary: Option<String>,
    pub messages: Vec<TurnMessage>,
    pub session_id: Option<i64>,
    pub halted: bool,
    pub halt_reason: Option<String>,
    pub notices: Vec<String>,
    /// Candidate sessions when the halt reason is `ambiguous_resume`.
    pub resume_candidates: Vec<SessionBrief>,
    pub context_resolution: Option<ContextResolution>,
    pub session_resolution: Option<SessionResolution>,
    pub preload: PreloadResolution,
}

impl TurnResult {
    pub fn halted(reason: impl Into<String>) -> Self {
        Self {
            halted: true,
            halt_reason: Some(reason.into()),
            ..Default::default()
        }
    }
}

/// Derive the answer title: first markdown heading, falling back to the query.
pub fn answer_title(answer: &str, query: &str) -> String {
    for line in answer.lines() {
        let trimmed = line.trim_start();
        if let Some(heading) = trimmed.strip_prefix('#') {
            let heading = heading.trim_start_matches('#').trim();
            if !heading.is_empty() {
                return heading.to_string();
            }
        }
    }
    query.trim().to_string()
}
