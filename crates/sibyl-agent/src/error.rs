use thiserror::Error;

use sibyl_adapters::ChatMessage;

/// The only errors `run_turn` raises to its caller. Everything else folds
/// into a halted `TurnResult` or a tool error payload the model sees.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The model reported the request too large. Carries a compacted
    /// fallback message set the caller may retry with.
    #[error("context overflow")]
    ContextOverflow { fallback: Vec<ChatMessage> },

    /// Invalid configuration detected at construction time.
    #[error("configuration error: {0}")]
    Config(String),
}
