use thiserror::Error;

/// Workspace-wide error taxonomy.
///
/// Three propagation families, kept on separate paths:
/// - programming invariants panic at the offending site (never this enum);
/// - expected runtime failures (`AmbiguousResume`, `CorpusMissing`, …) are
///   folded into a halted `TurnResult` by the orchestrator;
/// - external failures (`TransportTransient`) are retried internally and only
///   surface here once retries are exhausted.
#[derive(Debug, Error)]
pub enum SibylError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Context overflow: request exceeds the model window")]
    ContextOverflow,

    #[error("Transient transport failure: {0}")]
    TransportTransient(String),

    #[error("Permanent transport failure ({source_id}): {message}")]
    TransportPermanent { source_id: String, message: String },

    #[error("Tool '{tool}' failed: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Expected local corpus, zero local documents ingested")]
    CorpusMissing,

    #[error("Resume term '{term}' matched {count} sessions")]
    AmbiguousResume { term: String, count: usize },

    #[error("Plugin '{plugin}' failed to load: {reason}")]
    PluginLoad { plugin: String, reason: String },

    #[error("Hook callback failed in {hook}: {message}")]
    HookCallback { hook: String, message: String },

    #[error("Blocked by policy: {0}")]
    PolicyBlocked(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SibylError {
    /// Stable error code string, used in halt reasons and daemon replies.
    pub fn code(&self) -> &'static str {
        match self {
            SibylError::Config(_) => "CONFIG_ERROR",
            SibylError::ContextOverflow => "CONTEXT_OVERFLOW",
            SibylError::TransportTransient(_) => "TRANSPORT_TRANSIENT",
            SibylError::TransportPermanent { .. } => "TRANSPORT_PERMANENT",
            SibylError::ToolExecution { .. } => "TOOL_EXECUTION_ERROR",
            SibylError::CorpusMissing => "CORPUS_MISSING",
            SibylError::AmbiguousResume { .. } => "AMBIGUOUS_RESUME",
            SibylError::PluginLoad { .. } => "PLUGIN_LOAD_ERROR",
            SibylError::HookCallback { .. } => "HOOK_CALLBACK_ERROR",
            SibylError::PolicyBlocked(_) => "POLICY_BLOCKED",
            SibylError::Cancelled => "CANCELLED",
            SibylError::Database(_) => "DATABASE_ERROR",
            SibylError::Serialization(_) => "SERIALIZATION_ERROR",
            SibylError::Io(_) => "IO_ERROR",
            SibylError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether a retry of the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, SibylError::TransportTransient(_))
    }
}

pub type Result<T> = std::result::Result<T, SibylError>;
