use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("store error: {0}")]
    Store(#[from] sibyl_store::StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("summarization failed: {0}")]
    Summarization(String),
}

pub type Result<T> = std::result::Result<T, SessionError>;
