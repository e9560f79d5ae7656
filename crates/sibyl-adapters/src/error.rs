use thiserror::Error;

/// Failures from the non-LLM adapters (fetcher, file reader, embedder).
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unsupported file kind: {0}")]
    UnsupportedKind(String),

    #[error("No text extractor configured for {kind} files")]
    NoExtractor { kind: String },

    #[error("Timed out after {secs}s")]
    Timeout { secs: u64 },
}
