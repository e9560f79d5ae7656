use std::collections::BTreeMap;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Default bound on the LLM ↔ tool loop.
pub const DEFAULT_MAX_TURNS: u32 = 30;
/// Compaction triggers once accumulated tokens exceed this share of the window.
pub const DEFAULT_COMPACTION_THRESHOLD: f64 = 0.80;
/// Assumed model context window (tokens) when the provider does not report one.
pub const DEFAULT_CONTEXT_WINDOW: u32 = 200_000;

/// Top-level config (sibyl.toml + SIBYL_* env overrides).
///
/// Loaded once at process start and passed down as an immutable snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SibylConfig {
    #[serde(default = "default_model")]
    pub default_model: String,
    /// Cheap model used for turn summaries and compaction.
    #[serde(default = "default_summarization_model")]
    pub summarization_model: String,
    /// Small model used for narrow JSON contracts (shortlist planner,
    /// daemon intent planner). `None` disables both planners.
    #[serde(default)]
    pub interface_model: Option<String>,
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: f64,
    #[serde(default)]
    pub compaction_strategy: CompactionStrategy,
    #[serde(default = "default_context_window")]
    pub model_context_window: u32,
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub research: ResearchConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
    /// Tool names excluded from both the schema list and dispatch.
    #[serde(default)]
    pub disabled_tools: Vec<String>,
    /// User-declared command tools, interpolated into shell templates.
    #[serde(default)]
    pub custom_tools: Vec<CustomToolConfig>,
    /// Path to the plugin manifest; `None` runs without plugins.
    #[serde(default)]
    pub plugin_manifest: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompactionStrategy {
    /// Concatenate per-turn summaries.
    #[default]
    SummaryConcat,
    /// Replace the compacted summary with one model-written digest.
    LlmSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Endpoint settings for the default OpenAI-compatible chat adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            api_key: String::new(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_search_timeout")]
    pub search_timeout_secs: u64,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_llm_timeout")]
    pub llm_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_max_url_detail_links")]
    pub max_url_detail_links: usize,
    #[serde(default = "default_snippet_max_chars")]
    pub search_snippet_max_chars: usize,
    #[serde(default = "default_max_prompt_file_size")]
    pub max_prompt_file_size: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            search_timeout_secs: default_search_timeout(),
            fetch_timeout_secs: default_fetch_timeout(),
            llm_timeout_secs: default_llm_timeout(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            max_url_detail_links: default_max_url_detail_links(),
            search_snippet_max_chars: default_snippet_max_chars(),
            max_prompt_file_size: default_max_prompt_file_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResearchConfig {
    /// Only paths under these roots may be ingested. Empty list = no local
    /// ingestion at all.
    #[serde(default)]
    pub local_document_roots: Vec<String>,
    #[serde(default)]
    pub evidence_extraction_enabled: bool,
    #[serde(default)]
    pub query_classification: QueryClassificationConfig,
    #[serde(default = "default_shortlist_budget")]
    pub shortlist_budget: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryClassificationConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// One-shot summarization only triggers for corpora at or below this size.
    #[serde(default = "default_one_shot_threshold")]
    pub one_shot_document_threshold: usize,
}

impl Default for QueryClassificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            one_shot_document_threshold: default_one_shot_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Sender identities permitted to reach the router. Bare identities match
    /// any sub-resource; fully-qualified entries require an exact match.
    /// Empty list = deny everyone.
    #[serde(default)]
    pub allowed_senders: Vec<String>,
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
    #[serde(default = "default_chunk_chars")]
    pub response_chunk_chars: usize,
    #[serde(default = "default_transcript_max")]
    pub transcript_max_per_session: usize,
    /// First-token preset expansions, applied before the policy gate.
    #[serde(default)]
    pub presets: BTreeMap<String, String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            allowed_senders: Vec::new(),
            command_prefix: default_command_prefix(),
            response_chunk_chars: default_chunk_chars(),
            transcript_max_per_session: default_transcript_max(),
            presets: BTreeMap::new(),
        }
    }
}

/// A user-declared tool backed by a command template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomToolConfig {
    pub name: String,
    pub description: String,
    /// Template with `{param}` placeholders interpolated from tool arguments.
    pub command: String,
    /// Parameter names, all treated as required strings.
    #[serde(default)]
    pub params: Vec<String>,
    /// Optional guideline snippet appended to the system prompt.
    #[serde(default)]
    pub guideline: Option<String>,
}

fn default_model() -> String {
    "gpt-4.1".to_string()
}
fn default_summarization_model() -> String {
    "gpt-4.1-mini".to_string()
}
fn default_max_turns() -> u32 {
    DEFAULT_MAX_TURNS
}
fn default_compaction_threshold() -> f64 {
    DEFAULT_COMPACTION_THRESHOLD
}
fn default_context_window() -> u32 {
    DEFAULT_CONTEXT_WINDOW
}
fn default_state_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.sibyl")
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.sibyl/sibyl.db")
}
fn default_llm_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_search_timeout() -> u64 {
    20
}
fn default_fetch_timeout() -> u64 {
    30
}
fn default_llm_timeout() -> u64 {
    120
}
fn default_max_retries() -> u32 {
    4
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    15_000
}
fn default_max_url_detail_links() -> usize {
    25
}
fn default_snippet_max_chars() -> usize {
    400
}
fn default_max_prompt_file_size() -> u64 {
    2 * 1024 * 1024
}
fn default_shortlist_budget() -> usize {
    8
}
fn default_one_shot_threshold() -> usize {
    10
}
fn default_command_prefix() -> String {
    "!".to_string()
}
fn default_chunk_chars() -> usize {
    4000
}
fn default_transcript_max() -> usize {
    50
}
fn bool_true() -> bool {
    true
}

impl Default for SibylConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            summarization_model: default_summarization_model(),
            interface_model: None,
            max_turns: default_max_turns(),
            compaction_threshold: default_compaction_threshold(),
            compaction_strategy: CompactionStrategy::default(),
            model_context_window: default_context_window(),
            state_dir: default_state_dir(),
            database: DatabaseConfig::default(),
            llm: LlmConfig::default(),
            limits: LimitsConfig::default(),
            research: ResearchConfig::default(),
            daemon: DaemonConfig::default(),
            disabled_tools: Vec::new(),
            custom_tools: Vec::new(),
            plugin_manifest: None,
        }
    }
}

impl SibylConfig {
    /// Load config from a TOML file with SIBYL_* env var overrides.
    ///
    /// Falls back to `~/.sibyl/sibyl.toml` when no path is given; a missing
    /// file yields the defaults.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: SibylConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("SIBYL_").split("__"))
            .extract()
            .map_err(|e| crate::error::SibylError::Config(e.to_string()))?;

        if config.compaction_threshold <= 0.0 || config.compaction_threshold > 1.0 {
            return Err(crate::error::SibylError::Config(format!(
                "compaction_threshold must be in (0, 1], got {}",
                config.compaction_threshold
            )));
        }
        if config.max_turns == 0 {
            return Err(crate::error::SibylError::Config(
                "max_turns must be at least 1".to_string(),
            ));
        }

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.sibyl/sibyl.toml")
}
